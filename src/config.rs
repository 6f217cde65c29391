//! Service settings.
//!
//! Settings come from an optional TOML file. Every field has a default, so
//! an absent file (or an empty one) runs the built-in site registry with
//! the default detector parameters. `TIDEPEAK_CACHE_DIR` overrides the
//! cache directory; `.env` files are honoured by the binary before this
//! module is consulted.
//!
//! ```toml
//! cache_dir = "/var/lib/tidepeak"
//! buffer_hours = 36
//! duplicate_policy = "max_value"
//!
//! [crest_windows]
//! outer_minutes = 120
//! inner_minutes = 60
//!
//! [[sites]]
//! site_id = "sewells-point"
//! name = "Sewells Point, Norfolk, VA"
//! observation_station = "8638610"
//! crest_station = "8638610"
//! datum = { name = "NAVD88", offset = -1.88 }
//! thresholds = { minor = 2.62, moderate = 3.62, major = 4.62 }
//! method = "crest_anchored"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::analysis::crests::CrestWindows;
use crate::analysis::peaks::PeakConfig;
use crate::analysis::series::DuplicatePolicy;
use crate::cache::merge::TieBreak;
use crate::cache::store::cache_file_stem;
use crate::model::ConfigError;
use crate::stations::{self, SiteConfig};
use crate::window::WindowConfig;

pub const CONFIG_ENV: &str = "TIDEPEAK_CONFIG";
pub const CACHE_DIR_ENV: &str = "TIDEPEAK_CACHE_DIR";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeakSettings {
    pub min_separation_minutes: i64,
    pub min_prominence: f64,
    pub neighborhood_radius: usize,
}

impl Default for PeakSettings {
    fn default() -> Self {
        Self {
            // Semi-diurnal highs are ~12h25m apart; anything closer is one event.
            min_separation_minutes: 360,
            min_prominence: 0.3,
            // 30 six-minute samples = 3 hours either side.
            neighborhood_radius: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrestWindowSettings {
    pub outer_minutes: i64,
    pub inner_minutes: i64,
}

impl Default for CrestWindowSettings {
    fn default() -> Self {
        Self {
            outer_minutes: 120,
            inner_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cache_dir: PathBuf,
    /// When set, observations and crests are read from this directory
    /// instead of the live API.
    pub replay_dir: Option<PathBuf>,
    pub buffer_hours: i64,
    pub initial_lookback_days: i64,
    pub http_timeout_secs: u64,
    /// Sent as CO-OPS's `application` parameter.
    pub application: String,
    pub duplicate_policy: DuplicatePolicy,
    pub tie_break: TieBreak,
    pub peaks: PeakSettings,
    pub crest_windows: CrestWindowSettings,
    pub sites: Vec<SiteConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            replay_dir: None,
            buffer_hours: 36,
            initial_lookback_days: 30,
            http_timeout_secs: 30,
            application: "tidepeak_service".to_string(),
            duplicate_policy: DuplicatePolicy::FirstSeen,
            tie_break: TieBreak::HigherValue,
            peaks: PeakSettings::default(),
            crest_windows: CrestWindowSettings::default(),
            sites: Vec::new(),
        }
    }
}

impl Settings {
    /// Parses and validates settings from TOML text. An empty `sites`
    /// list is filled from the built-in registry.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = toml::from_str(text).map_err(|e| ConfigError::Settings(e.to_string()))?;
        if settings.sites.is_empty() {
            settings.sites = stations::builtin_sites()?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let text = match path {
            Some(p) => std::fs::read_to_string(p)
                .map_err(|e| ConfigError::Settings(format!("cannot read {}: {}", p.display(), e)))?,
            None => String::new(),
        };
        Self::from_toml_str(&text)
    }

    /// Applies environment overrides. Takes the lookup as a function so
    /// tests never touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_hours < 0 {
            return Err(ConfigError::Settings("buffer_hours must not be negative".to_string()));
        }
        if self.initial_lookback_days <= 0 {
            return Err(ConfigError::Settings("initial_lookback_days must be positive".to_string()));
        }
        self.peak_config().validate()?;
        self.crest_windows()?;

        let mut seen: HashMap<String, &str> = HashMap::new();
        for site in &self.sites {
            site.validate()?;
            let stem = cache_file_stem(&site.site_id);
            if let Some(other) = seen.insert(stem.clone(), site.site_id.as_str()) {
                return Err(ConfigError::Settings(if other == site.site_id {
                    format!("duplicate site id '{}'", site.site_id)
                } else {
                    format!(
                        "site ids '{}' and '{}' would share cache file '{}.json'",
                        other, site.site_id, stem
                    )
                }));
            }
        }
        Ok(())
    }

    pub fn peak_config(&self) -> PeakConfig {
        PeakConfig {
            min_separation: Duration::minutes(self.peaks.min_separation_minutes),
            min_prominence: self.peaks.min_prominence,
            neighborhood_radius: self.peaks.neighborhood_radius,
        }
    }

    pub fn crest_windows(&self) -> Result<CrestWindows, ConfigError> {
        CrestWindows::new(
            Duration::minutes(self.crest_windows.outer_minutes),
            Duration::minutes(self.crest_windows.inner_minutes),
        )
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            buffer: Duration::hours(self.buffer_hours),
            initial_lookback: Duration::days(self.initial_lookback_days),
        }
    }

    /// Selects the sites named in `ids`, or all sites when `ids` is empty.
    pub fn select_sites(&self, ids: &[String]) -> Result<Vec<&SiteConfig>, ConfigError> {
        if ids.is_empty() {
            return Ok(self.sites.iter().collect());
        }
        ids.iter()
            .map(|id| stations::find_site(&self.sites, id).ok_or_else(|| ConfigError::UnknownSite(id.clone())))
            .collect()
    }
}

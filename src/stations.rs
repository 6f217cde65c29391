/// Site registry for the tide peak cache service.
///
/// A site is one cache document on the dashboard. Each site names the
/// station its observations come from, optionally the station whose tide
/// predictions anchor crest detection, the datum its values are expressed
/// in, its flood thresholds and the detection method used to build its
/// events. Sites differ only in these values; the pipeline is the same for
/// all of them.
///
/// `SITE_REGISTRY` holds the built-in sites used when the settings file
/// does not define any.

use serde::Deserialize;

use crate::model::{ConfigError, Datum, Thresholds};

// ---------------------------------------------------------------------------
// Detection method
// ---------------------------------------------------------------------------

/// How a site's events are detected. Events from different methods are
/// never mixed in one cache; the method tag recorded in the cache changes
/// whenever the method (or its version) does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Peaks found directly in the observation series.
    LocalMaxima,
    /// Observed maxima around predicted high tides.
    CrestAnchored,
}

impl DetectionMethod {
    /// Identifier stored in the cache document's `methodTag`.
    pub fn tag(&self) -> &'static str {
        match self {
            DetectionMethod::LocalMaxima => "local-maxima-v1",
            DetectionMethod::CrestAnchored => "crest-window-v1",
        }
    }
}

// ---------------------------------------------------------------------------
// Site configuration
// ---------------------------------------------------------------------------

fn default_source_datum() -> String {
    "MLLW".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteConfig {
    /// Identifier used for the cache file name and log lines.
    pub site_id: String,
    pub name: String,
    /// Station the observed water levels are fetched from.
    pub observation_station: String,
    /// Station whose high tide predictions anchor crest detection.
    #[serde(default)]
    pub crest_station: Option<String>,
    /// Datum the provider is asked to report values in.
    #[serde(default = "default_source_datum")]
    pub source_datum: String,
    /// Datum the cache is kept in, and the offset from `source_datum`.
    pub datum: Datum,
    /// Thresholds in the target datum.
    pub thresholds: Thresholds,
    pub method: DetectionMethod,
}

impl SiteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_id.trim().is_empty() {
            return Err(ConfigError::Settings("site_id must not be empty".to_string()));
        }
        if !self.datum.offset.is_finite() {
            return Err(ConfigError::Settings(format!(
                "datum offset for site {} must be a finite number",
                self.site_id
            )));
        }
        if self.method == DetectionMethod::CrestAnchored && self.crest_station.is_none() {
            return Err(ConfigError::MissingCrestStation {
                site: self.site_id.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in registry
// ---------------------------------------------------------------------------

/// Static description of a built-in site.
pub struct Station {
    pub site_id: &'static str,
    pub name: &'static str,
    pub observation_station: &'static str,
    pub crest_station: Option<&'static str>,
    pub datum_name: &'static str,
    pub datum_offset_ft: f64,
    /// (minor, moderate, major) in feet, target datum.
    pub thresholds_ft: (f64, f64, f64),
    pub method: DetectionMethod,
}

/// Built-in sites, NOAA CO-OPS station ids.
///
/// Thresholds: NWS coastal flood categories for each gauge, in feet MLLW.
pub static SITE_REGISTRY: &[Station] = &[
    Station {
        site_id: "sewells-point",
        name: "Sewells Point, Norfolk, VA",
        observation_station: "8638610",
        crest_station: Some("8638610"),
        datum_name: "MLLW",
        datum_offset_ft: 0.0,
        thresholds_ft: (4.5, 5.5, 6.5),
        method: DetectionMethod::CrestAnchored,
    },
    Station {
        site_id: "charleston",
        name: "Charleston, Cooper River Entrance, SC",
        observation_station: "8665530",
        crest_station: None,
        datum_name: "MLLW",
        datum_offset_ft: 0.0,
        thresholds_ft: (7.0, 7.5, 8.0),
        method: DetectionMethod::LocalMaxima,
    },
];

impl Station {
    pub fn to_config(&self) -> Result<SiteConfig, ConfigError> {
        let (minor, moderate, major) = self.thresholds_ft;
        Ok(SiteConfig {
            site_id: self.site_id.to_string(),
            name: self.name.to_string(),
            observation_station: self.observation_station.to_string(),
            crest_station: self.crest_station.map(String::from),
            source_datum: default_source_datum(),
            datum: Datum::new(self.datum_name, self.datum_offset_ft),
            thresholds: Thresholds::new(minor, moderate, major)?,
            method: self.method,
        })
    }
}

/// The built-in registry as owned site configurations.
pub fn builtin_sites() -> Result<Vec<SiteConfig>, ConfigError> {
    SITE_REGISTRY.iter().map(Station::to_config).collect()
}

/// Looks up a site by id. Returns `None` if not found.
pub fn find_site<'a>(sites: &'a [SiteConfig], site_id: &str) -> Option<&'a SiteConfig> {
    sites.iter().find(|s| s.site_id == site_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

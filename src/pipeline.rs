//! One site, one run.
//!
//! The pipeline is the only place that touches the outside world: it holds
//! the site's cache lock, loads the cache, asks the providers for data,
//! runs the pure analysis functions, merges and finally saves. Nothing is
//! written unless every step before the save succeeded, so a failed run
//! leaves the previous document untouched and the next scheduled run simply
//! retries the same window.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::alert::thresholds::{classify_events, count_flood_events};
use crate::analysis::crests::{CrestWindows, build_crest_events};
use crate::analysis::peaks::{PeakConfig, detect_peaks};
use crate::analysis::series::{DuplicatePolicy, NormalizeReport, normalize_crests, normalize_series, series_end};
use crate::cache::PeakCache;
use crate::cache::merge::{MergeOutcome, TieBreak, WatermarkUpdate, merge_events};
use crate::cache::store::{CacheError, CacheStore};
use crate::config::Settings;
use crate::ingest::{CrestProvider, IngestError, ObservationProvider};
use crate::logging::{self, DataSource};
use crate::model::{ConfigError, Event, Sample, SourceTag};
use crate::stations::{DetectionMethod, SiteConfig};
use crate::window::{RunMode, TimeWindow, WindowConfig, compute_window};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream data error: {0}")]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl PipelineError {
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::Config(_) => true,
            PipelineError::Cache(e) => e.is_configuration(),
            PipelineError::Ingest(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Analysis and merge parameters shared by every site in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub peaks: PeakConfig,
    pub crest_windows: CrestWindows,
    pub window: WindowConfig,
    pub duplicate_policy: DuplicatePolicy,
    pub tie_break: TieBreak,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let peaks = settings.peak_config();
        peaks.validate()?;
        Ok(Self {
            peaks,
            crest_windows: settings.crest_windows()?,
            window: settings.window_config(),
            duplicate_policy: settings.duplicate_policy,
            tie_break: settings.tie_break,
        })
    }
}

/// The data sources for a run, plus the tag their log lines carry.
pub struct Providers<'a> {
    pub observations: &'a dyn ObservationProvider,
    pub crests: &'a dyn CrestProvider,
    pub source: DataSource,
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Events merged and the cache saved.
    Saved,
    /// The window held no usable observations; cache not written.
    NoObservations,
    /// Crest-anchored site with no predicted crests in the window; cache
    /// not written.
    NoCrests,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub site_id: String,
    pub mode: RunMode,
    pub window: TimeWindow,
    pub status: RunStatus,
    pub series: NormalizeReport,
    pub detected: usize,
    pub uncovered_crests: usize,
    pub merge: MergeOutcome,
    pub total_events: usize,
    pub last_processed_time: Option<DateTime<Utc>>,
    pub saved_to: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

fn fresh_cache(site: &SiteConfig) -> PeakCache {
    PeakCache::new(&site.site_id, &site.datum.name, site.thresholds, site.method.tag())
}

/// Brings a loaded document's descriptive fields in line with the site
/// configuration, which is authoritative for them.
fn reconcile(cache: &mut PeakCache, site: &SiteConfig) {
    // `save` derives the file name from `cache.site`; it must be the file we loaded and locked.
    if cache.site != site.site_id {
        logging::warn(
            DataSource::Cache,
            Some(&site.site_id),
            &format!("cache document names site '{}'; rewriting as '{}'", cache.site, site.site_id),
        );
        cache.site = site.site_id.clone();
    }
    if cache.thresholds != site.thresholds {
        logging::info(
            DataSource::Cache,
            Some(&site.site_id),
            &format!(
                "thresholds changed to {}/{}/{}; existing categories are kept until each event is updated",
                site.thresholds.minor(),
                site.thresholds.moderate(),
                site.thresholds.major()
            ),
        );
        cache.thresholds = site.thresholds;
    }
    if cache.datum != site.datum.name {
        logging::warn(
            DataSource::Cache,
            Some(&site.site_id),
            &format!("cache datum '{}' differs from configured '{}'", cache.datum, site.datum.name),
        );
        cache.datum = site.datum.name.clone();
    }
}

fn detect(
    site: &SiteConfig,
    series: &[Sample],
    window: &TimeWindow,
    config: &PipelineConfig,
    providers: &Providers<'_>,
) -> Result<Option<(Vec<Event>, usize)>, PipelineError> {
    match site.method {
        DetectionMethod::LocalMaxima => Ok(Some((detect_peaks(series, &config.peaks), 0))),
        DetectionMethod::CrestAnchored => {
            let station = site.crest_station.as_deref().ok_or_else(|| ConfigError::MissingCrestStation {
                site: site.site_id.clone(),
            })?;
            let raw = providers.crests.fetch_crests(station, window).inspect_err(|e| {
                logging::log_ingest_failure(providers.source, &site.site_id, "crest fetch", e)
            })?;
            let crests = normalize_crests(raw, Some(window));
            if crests.is_empty() {
                return Ok(None);
            }

            let build = build_crest_events(series, &crests, &config.crest_windows);
            for crest in &build.uncovered {
                logging::debug(
                    DataSource::Analysis,
                    Some(&site.site_id),
                    &format!("skipping crest {}: no observation within inner window", crest.timestamp.to_rfc3339()),
                );
            }
            if !build.uncovered.is_empty() {
                logging::info(
                    DataSource::Analysis,
                    Some(&site.site_id),
                    &format!("{} of {} crests skipped for missing coverage", build.uncovered.len(), crests.len()),
                );
            }
            Ok(Some((build.events, build.uncovered.len())))
        }
    }
}

/// Runs one site end to end.
///
/// `now` is injected so tests are deterministic; the binary passes
/// `Utc::now()`.
pub fn run_site(
    site: &SiteConfig,
    mode: RunMode,
    now: DateTime<Utc>,
    config: &PipelineConfig,
    providers: &Providers<'_>,
    store: &CacheStore,
) -> Result<RunSummary, PipelineError> {
    site.validate()?;
    let site_id = site.site_id.as_str();
    let _lock = store.lock(site_id)?;

    let mut cache = match store.load(site_id, config.tie_break)? {
        Some(cache) => cache,
        None => {
            logging::info(DataSource::Cache, Some(site_id), "no cache document yet; starting empty");
            fresh_cache(site)
        }
    };
    reconcile(&mut cache, site);

    let window = compute_window(mode, cache.last_processed_time, now, &config.window)?;
    logging::info(DataSource::System, Some(site_id), &format!("{} run over {}", mode, window));

    let raw = providers
        .observations
        .fetch_observations(&site.observation_station, &window)
        .inspect_err(|e| logging::log_ingest_failure(providers.source, site_id, "observation fetch", e))?;
    let (series, report) = normalize_series(raw, &site.datum, Some(&window), config.duplicate_policy);
    logging::debug(
        DataSource::Analysis,
        Some(site_id),
        &format!(
            "{} samples kept of {} ({} non-finite, {} outside window, {} duplicates)",
            report.kept(),
            report.input,
            report.non_finite,
            report.outside_window,
            report.duplicates
        ),
    );

    let mut summary = RunSummary {
        site_id: site_id.to_string(),
        mode,
        window,
        status: RunStatus::NoObservations,
        series: report,
        detected: 0,
        uncovered_crests: 0,
        merge: MergeOutcome::default(),
        total_events: cache.len(),
        last_processed_time: cache.last_processed_time,
        saved_to: None,
    };

    // An empty window is a skip in every mode: a backfill that found nothing
    // leaves the watermark where it was instead of jumping to the window end.
    if series.is_empty() {
        logging::info(DataSource::System, Some(site_id), "no observations in window; nothing to do");
        return Ok(summary);
    }

    let Some((mut events, uncovered)) = detect(site, &series, &window, config, providers)? else {
        logging::info(DataSource::System, Some(site_id), "no predicted crests in window; nothing to do");
        summary.status = RunStatus::NoCrests;
        return Ok(summary);
    };

    classify_events(&mut events, &site.thresholds);
    let events: Vec<Event> = events.into_iter().map(|e| e.with_source(SourceTag::Observed)).collect();
    summary.detected = events.len();
    summary.uncovered_crests = uncovered;
    let flood_events = count_flood_events(&events);

    let watermark = if mode.is_backfill() {
        WatermarkUpdate::WindowEnd(window.end.min(now))
    } else {
        WatermarkUpdate::DataCovered(series_end(&series))
    };
    let outcome = merge_events(&mut cache, events, site.method.tag(), config.tie_break, watermark);
    if outcome.reset {
        logging::warn(
            DataSource::Cache,
            Some(site_id),
            &format!(
                "detection method changed to {}; discarded {} cached events (run a backfill to rebuild history)",
                site.method.tag(),
                outcome.discarded
            ),
        );
    }

    let path = store.save(&cache)?;
    logging::info(
        DataSource::Cache,
        Some(site_id),
        &format!(
            "{} detected ({} at or above minor), {} added, {} updated; {} events cached",
            summary.detected,
            flood_events,
            outcome.added,
            outcome.updated,
            cache.len()
        ),
    );

    summary.status = RunStatus::Saved;
    summary.merge = outcome;
    summary.total_events = cache.len();
    summary.last_processed_time = cache.last_processed_time;
    summary.saved_to = Some(path);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_from_default_settings() {
        let settings = Settings::from_toml_str("").unwrap();
        let config = PipelineConfig::from_settings(&settings).unwrap();
        assert_eq!(config.tie_break, TieBreak::HigherValue);
        assert_eq!(config.crest_windows.outer, chrono::Duration::minutes(120));
    }

    #[test]
    fn test_error_classification() {
        let config: PipelineError = ConfigError::UnknownSite("x".to_string()).into();
        assert!(config.is_configuration());
        let ingest: PipelineError = IngestError::Api("boom".to_string()).into();
        assert!(!ingest.is_configuration());
    }
}

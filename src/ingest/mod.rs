/// Data provider adapters.
///
/// Each upstream service gets its own adapter that turns the provider's
/// payload into the canonical `Sample` / `CrestMark` shapes. The analysis
/// and cache code only ever see those shapes, through the two traits below.
///
/// Submodules:
/// - `coops`  — NOAA CO-OPS water levels and high/low tide predictions.
/// - `replay` — JSON files on disk, for offline reruns and development.

pub mod coops;
pub mod replay;

use thiserror::Error;

use crate::model::{CrestMark, Sample};
use crate::window::TimeWindow;

/// Errors raised while fetching or decoding upstream data. Any of these
/// aborts the current run before the cache is written.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("provider reported an error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Source of observed water levels.
///
/// An empty result is a valid answer ("no data in this window"), not an
/// error. Values are returned in the provider's native datum; the
/// pipeline applies the site's datum offset.
pub trait ObservationProvider {
    fn fetch_observations(&self, station: &str, window: &TimeWindow) -> Result<Vec<Sample>, IngestError>;
}

/// Source of predicted crest times.
pub trait CrestProvider {
    fn fetch_crests(&self, station: &str, window: &TimeWindow) -> Result<Vec<CrestMark>, IngestError>;
}

/// Replay provider for working with recorded data
///
/// When the live API is unavailable (or when rebuilding a cache from an
/// archived pull), point the service at a directory of JSON files instead:
///
/// - `<station>.observations.json` — array of `{"timestamp", "value"}`
/// - `<station>.crests.json`       — array of `{"timestamp"}`
///
/// A missing file means "no data for this station" and yields an empty
/// series, matching how the live providers report empty windows.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use super::{CrestProvider, IngestError, ObservationProvider};
use crate::model::{CrestMark, Sample};
use crate::window::TimeWindow;

pub struct ReplayProvider {
    dir: PathBuf,
}

impl ReplayProvider {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn observations_path(&self, station: &str) -> PathBuf {
        self.dir.join(format!("{}.observations.json", station))
    }

    pub fn crests_path(&self, station: &str) -> PathBuf {
        self.dir.join(format!("{}.crests.json", station))
    }

    fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, IngestError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(IngestError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&contents)
            .map_err(|e| IngestError::Parse(format!("{}: {}", path.display(), e)))
    }
}

impl ObservationProvider for ReplayProvider {
    fn fetch_observations(&self, station: &str, window: &TimeWindow) -> Result<Vec<Sample>, IngestError> {
        let samples: Vec<Sample> = Self::read_all(&self.observations_path(station))?;
        Ok(samples.into_iter().filter(|s| window.contains(s.timestamp)).collect())
    }
}

impl CrestProvider for ReplayProvider {
    fn fetch_crests(&self, station: &str, window: &TimeWindow) -> Result<Vec<CrestMark>, IngestError> {
        let crests: Vec<CrestMark> = Self::read_all(&self.crests_path(station))?;
        Ok(crests.into_iter().filter(|c| window.contains(c.timestamp)).collect())
    }
}

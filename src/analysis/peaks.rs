//! Local-maxima peak detection.
//!
//! Finds peaks directly in an observation series, without any external
//! timing signal. A peak must be a local maximum, stand at least
//! `min_prominence` above the lowest sample in its neighborhood, and be at
//! least `min_separation` away from every other reported peak.

use chrono::Duration;

use crate::model::{ConfigError, Event, Sample};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakConfig {
    pub min_separation: Duration,
    pub min_prominence: f64,
    /// Half-width, in samples, of the window used to find the local minimum.
    pub neighborhood_radius: usize,
}

impl PeakConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_separation < Duration::zero() {
            return Err(ConfigError::InvalidPeakConfig(
                "min_separation must not be negative".to_string(),
            ));
        }
        if !self.min_prominence.is_finite() || self.min_prominence < 0.0 {
            return Err(ConfigError::InvalidPeakConfig(format!(
                "min_prominence must be a non-negative number, got {}",
                self.min_prominence
            )));
        }
        if self.neighborhood_radius == 0 {
            return Err(ConfigError::InvalidPeakConfig(
                "neighborhood_radius must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Interior indices that are local maxima with enough prominence.
fn prominent_candidates(samples: &[Sample], config: &PeakConfig) -> Vec<usize> {
    let n = samples.len();
    let mut candidates = Vec::new();

    for i in 1..n - 1 {
        let v = samples[i].value;
        if v < samples[i - 1].value || v < samples[i + 1].value {
            continue;
        }

        let lo = i.saturating_sub(config.neighborhood_radius);
        let hi = (i + config.neighborhood_radius).min(n - 1);
        let local_min = samples[lo..=hi]
            .iter()
            .map(|s| s.value)
            .fold(f64::INFINITY, f64::min);

        if v - local_min >= config.min_prominence {
            candidates.push(i);
        }
    }

    candidates
}

/// Detects peaks in a normalized (time-ordered, deduplicated) series.
///
/// Returned events are unclassified and keyed by their own observed time.
/// Within a cluster closer than `min_separation`, the first sample to reach
/// the cluster's maximum is the one reported.
pub fn detect_peaks(samples: &[Sample], config: &PeakConfig) -> Vec<Event> {
    if samples.len() < 3 {
        return Vec::new();
    }

    let mut accepted: Vec<Sample> = Vec::new();
    for i in prominent_candidates(samples, config) {
        let candidate = samples[i];
        match accepted.last_mut() {
            Some(last) if candidate.timestamp - last.timestamp < config.min_separation => {
                // Replacement only ever moves the kept peak later, so its
                // distance to the peak before it can only grow.
                if candidate.value > last.value {
                    *last = candidate;
                }
            }
            _ => accepted.push(candidate),
        }
    }

    accepted.iter().map(Event::at_sample).collect()
}

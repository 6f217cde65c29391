//! Observation series normalization.
//!
//! Providers hand back samples in whatever order and datum they publish.
//! Everything downstream assumes a series that is in the site's target
//! datum, time-ordered, finite and free of duplicate timestamps; this module
//! is the one place that establishes those properties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CrestMark, Datum, Sample};
use crate::window::TimeWindow;

/// How to resolve two samples that share a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep whichever sample the provider returned first.
    #[default]
    FirstSeen,
    /// Keep the highest value.
    MaxValue,
}

/// What normalization discarded, for run logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub input: usize,
    pub non_finite: usize,
    pub outside_window: usize,
    pub duplicates: usize,
}

impl NormalizeReport {
    pub fn kept(&self) -> usize {
        self.input - self.non_finite - self.outside_window - self.duplicates
    }
}

/// Converts raw provider samples into a working series.
///
/// Steps, in order: drop non-finite values, apply the datum offset, clip to
/// `window` (when given), stable-sort by time, then collapse equal
/// timestamps according to `policy`. The stable sort is what makes
/// `FirstSeen` mean "first in provider order".
pub fn normalize_series(
    raw: Vec<Sample>,
    datum: &Datum,
    window: Option<&TimeWindow>,
    policy: DuplicatePolicy,
) -> (Vec<Sample>, NormalizeReport) {
    let mut report = NormalizeReport {
        input: raw.len(),
        ..Default::default()
    };

    let mut samples: Vec<Sample> = Vec::with_capacity(raw.len());
    for s in raw {
        if !s.value.is_finite() {
            report.non_finite += 1;
            continue;
        }
        if let Some(w) = window {
            if !w.contains(s.timestamp) {
                report.outside_window += 1;
                continue;
            }
        }
        samples.push(Sample::new(s.timestamp, datum.convert(s.value)));
    }

    samples.sort_by_key(|s| s.timestamp);

    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    for s in samples {
        match out.last_mut() {
            Some(last) if last.timestamp == s.timestamp => {
                report.duplicates += 1;
                if policy == DuplicatePolicy::MaxValue && s.value > last.value {
                    *last = s;
                }
            }
            _ => out.push(s),
        }
    }

    (out, report)
}

/// Sorts and deduplicates crest marks, optionally clipping to `window`.
pub fn normalize_crests(raw: Vec<CrestMark>, window: Option<&TimeWindow>) -> Vec<CrestMark> {
    let mut crests: Vec<CrestMark> = raw
        .into_iter()
        .filter(|c| window.map_or(true, |w| w.contains(c.timestamp)))
        .collect();
    crests.sort();
    crests.dedup();
    crests
}

/// Latest timestamp covered by a normalized series.
pub fn series_end(samples: &[Sample]) -> Option<DateTime<Utc>> {
    samples.last().map(|s| s.timestamp)
}

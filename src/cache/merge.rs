//! Cache merge engine.
//!
//! Folds a batch of freshly built events into a cache without ever losing an
//! accepted peak and without creating a second entry for an existing
//! identity. The conflict rule is asymmetric (an entry only changes when the
//! incoming event is preferred) which makes a merge idempotent: applying the
//! same batch twice leaves the cache exactly as applying it once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PeakCache;
use crate::model::{Event, SourceTag};

/// Which of two events sharing a key is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The higher value wins; a non-finite stored value always loses.
    #[default]
    HigherValue,
    /// An observed event always supersedes a forecast one and a forecast
    /// never supersedes an observation; otherwise the higher value wins.
    ObservedOverForecast,
}

/// How the watermark moves at the end of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkUpdate {
    /// Incremental runs: the latest sample actually fetched, if any. The
    /// watermark never moves backwards under this update.
    DataCovered(Option<DateTime<Utc>>),
    /// Backfill runs: the end of the requested window, regardless of what
    /// data came back.
    WindowEnd(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The stored method tag differed and the cache's events were cleared.
    pub reset: bool,
    /// Events dropped by the reset.
    pub discarded: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.reset || self.added > 0 || self.updated > 0
    }
}

/// Returns `true` when `candidate` should replace `stored`.
pub fn prefers(stored: &Event, candidate: &Event, policy: TieBreak) -> bool {
    let higher = candidate.value > stored.value || !stored.value.is_finite();
    match policy {
        TieBreak::HigherValue => higher,
        TieBreak::ObservedOverForecast => match (stored.source_tag, candidate.source_tag) {
            (Some(SourceTag::Forecast), Some(SourceTag::Observed)) => true,
            (Some(SourceTag::Observed), Some(SourceTag::Forecast)) => false,
            _ => higher,
        },
    }
}

/// Merges `new_events` into `cache` under `method_tag`.
///
/// A cache built by a different method is cleared first: keys from
/// different detectors are not comparable. The watermark is left alone by
/// the reset so a follow-up backfill can repopulate history.
pub fn merge_events(
    cache: &mut PeakCache,
    new_events: impl IntoIterator<Item = Event>,
    method_tag: &str,
    policy: TieBreak,
    watermark: WatermarkUpdate,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    if cache.method_tag != method_tag {
        outcome.reset = true;
        outcome.discarded = cache.len();
        cache.event_map_mut().clear();
        cache.method_tag = method_tag.to_string();
    }

    let events = cache.event_map_mut();
    for event in new_events {
        match events.get_mut(&event.key) {
            None => {
                events.insert(event.key, event);
                outcome.added += 1;
            }
            Some(stored) => {
                if prefers(stored, &event, policy) {
                    stored.observed_time = event.observed_time;
                    stored.value = event.value;
                    stored.category = event.category;
                    stored.source_tag = event.source_tag;
                    outcome.updated += 1;
                } else {
                    outcome.unchanged += 1;
                }
            }
        }
    }

    cache.last_processed_time = match watermark {
        WatermarkUpdate::DataCovered(None) => cache.last_processed_time,
        WatermarkUpdate::DataCovered(Some(end)) => Some(match cache.last_processed_time {
            Some(last) => last.max(end),
            None => end,
        }),
        WatermarkUpdate::WindowEnd(end) => Some(end),
    };

    outcome
}

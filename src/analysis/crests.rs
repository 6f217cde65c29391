//! Crest-anchored event building.
//!
//! When an authoritative timing signal exists (predicted high tides), each
//! predicted crest is paired with the observed maximum near it. Two windows
//! are involved:
//!
//! - the outer window bounds where the observed maximum may be found, which
//!   tolerates lag between the observation network and the tide clock;
//! - the inner window is a coverage gate: at least one observation must sit
//!   this close to the crest or the crest is skipped, so a sensor outage
//!   spanning a crest never produces a "confirmed" high from distant data.
//!
//! Events are keyed by the crest time, not the observed time, so a rerun
//! that later finds a different maximum for the same crest updates the
//! existing cache entry instead of adding a second one.

use chrono::Duration;

use crate::model::{ConfigError, CrestMark, Event, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrestWindows {
    pub outer: Duration,
    pub inner: Duration,
}

impl CrestWindows {
    pub fn new(outer: Duration, inner: Duration) -> Result<Self, ConfigError> {
        if inner <= Duration::zero() || inner > outer {
            return Err(ConfigError::InvalidCrestWindows {
                inner_minutes: inner.num_minutes(),
                outer_minutes: outer.num_minutes(),
            });
        }
        Ok(Self { outer, inner })
    }
}

/// Result of a crest sweep: the events built plus the crests dropped by the
/// coverage gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrestBuild {
    pub events: Vec<Event>,
    pub uncovered: Vec<CrestMark>,
}

/// Builds one event per covered crest.
///
/// `samples` and `crests` must both be time-ordered (see
/// `analysis::series`). The left edge of the outer window only ever moves
/// forward, so the sweep is linear in samples plus crests for
/// non-overlapping windows.
pub fn build_crest_events(samples: &[Sample], crests: &[CrestMark], windows: &CrestWindows) -> CrestBuild {
    let mut build = CrestBuild::default();
    let mut left = 0;

    for crest in crests {
        let c = crest.timestamp;
        let lo = c - windows.outer;
        let hi = c + windows.outer;

        while left < samples.len() && samples[left].timestamp < lo {
            left += 1;
        }

        let mut covered = false;
        let mut best: Option<&Sample> = None;
        for s in samples[left..].iter().take_while(|s| s.timestamp <= hi) {
            let offset = s.timestamp - c;
            if offset >= -windows.inner && offset <= windows.inner {
                covered = true;
            }
            if best.map_or(true, |b| s.value > b.value) {
                best = Some(s);
            }
        }

        match best {
            Some(sample) if covered => build.events.push(Event::anchored(sample, c)),
            _ => build.uncovered.push(*crest),
        }
    }

    // Crest order and observed order only differ when outer windows overlap.
    build.events.sort_by_key(|e| (e.observed_time, e.key));
    build
}

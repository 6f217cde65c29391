//! Flood category classification.
//!
//! Maps a peak value onto the site's threshold ladder. The ladder is
//! evaluated top-down, so a value at or above `major` is Major regardless of
//! the lower rungs.

use crate::model::{Category, Event, Thresholds};

/// Returns the flood category for `value` against `thresholds`.
///
/// Boundaries are inclusive: a value exactly at a threshold belongs to that
/// threshold's category.
pub fn classify(value: f64, thresholds: &Thresholds) -> Category {
    if value >= thresholds.major() {
        Category::Major
    } else if value >= thresholds.moderate() {
        Category::Moderate
    } else if value >= thresholds.minor() {
        Category::Minor
    } else {
        Category::None
    }
}

/// Attaches a category to every event in place.
pub fn classify_events(events: &mut [Event], thresholds: &Thresholds) {
    for event in events.iter_mut() {
        event.category = classify(event.value, thresholds);
    }
}

/// Counts events at or above the minor threshold.
pub fn count_flood_events(events: &[Event]) -> usize {
    events.iter().filter(|e| e.category >= Category::Minor).count()
}

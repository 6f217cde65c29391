/// The per-site peak event cache.
///
/// `PeakCache` is the in-memory form used during a run: events live in an
/// ordered map keyed by their identity instant, which makes "unique by key"
/// structural. `CacheDocument` is the persisted JSON contract read by the
/// dashboard, where events are a flat array sorted by observed time.
///
/// Submodules:
/// - `merge` — folds freshly built events into a cache (keep-best rule).
/// - `store` — atomic load/save and the per-site run lock.

pub mod merge;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Event, Thresholds};

use self::merge::{TieBreak, prefers};

// ---------------------------------------------------------------------------
// In-memory cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PeakCache {
    pub site: String,
    pub datum: String,
    pub thresholds: Thresholds,
    pub method_tag: String,
    pub last_processed_time: Option<DateTime<Utc>>,
    events: BTreeMap<DateTime<Utc>, Event>,
}

impl PeakCache {
    /// An empty cache with no watermark.
    pub fn new(
        site: impl Into<String>,
        datum: impl Into<String>,
        thresholds: Thresholds,
        method_tag: impl Into<String>,
    ) -> Self {
        Self {
            site: site.into(),
            datum: datum.into(),
            thresholds,
            method_tag: method_tag.into(),
            last_processed_time: None,
            events: BTreeMap::new(),
        }
    }

    /// Events sorted by observed time (ties broken by key).
    pub fn events(&self) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.events.values().collect();
        events.sort_by_key(|e| (e.observed_time, e.key));
        events
    }

    pub fn get(&self, key: &DateTime<Utc>) -> Option<&Event> {
        self.events.get(key)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn event_map_mut(&mut self) -> &mut BTreeMap<DateTime<Utc>, Event> {
        &mut self.events
    }

    /// Rebuilds an in-memory cache from its persisted form.
    ///
    /// A hand-edited document may repeat a key; repeats are folded with the
    /// same rule the merge engine uses, so loading never fails on them.
    pub fn from_document(doc: CacheDocument, policy: TieBreak) -> Self {
        let mut events: BTreeMap<DateTime<Utc>, Event> = BTreeMap::new();
        for event in doc.events {
            match events.get_mut(&event.key) {
                Some(stored) => {
                    if prefers(stored, &event, policy) {
                        *stored = event;
                    }
                }
                None => {
                    events.insert(event.key, event);
                }
            }
        }
        Self {
            site: doc.site,
            datum: doc.datum,
            thresholds: doc.thresholds,
            method_tag: doc.method_tag,
            last_processed_time: doc.last_processed_time,
            events,
        }
    }

    pub fn to_document(&self) -> CacheDocument {
        CacheDocument {
            site: self.site.clone(),
            datum: self.datum.clone(),
            thresholds: self.thresholds,
            method_tag: self.method_tag.clone(),
            last_processed_time: self.last_processed_time,
            events: self.events().into_iter().cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted document
// ---------------------------------------------------------------------------

/// The JSON document written for each site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDocument {
    pub site: String,
    pub datum: String,
    pub thresholds: Thresholds,
    pub method_tag: String,
    #[serde(default)]
    pub last_processed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<Event>,
}

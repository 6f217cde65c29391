/// Core data types for the tide peak cache service.
///
/// This module defines the shared domain model imported by all other modules:
/// samples, crest marks, events, the threshold ladder and the vertical datum.
/// It contains no I/O. Layer-specific errors live next to the layer that
/// raises them; only `ConfigError` is defined here because every layer
/// validates configuration values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Series types
// ---------------------------------------------------------------------------

/// A single water level observation, already expressed in the site's
/// target vertical datum once it reaches the analysis code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// An independently predicted local maximum (e.g. an astronomical high tide).
///
/// Carries timing only; the predicted height is deliberately dropped so the
/// cache never mixes predicted and observed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrestMark {
    pub timestamp: DateTime<Utc>,
}

impl CrestMark {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp }
    }
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Flood severity category, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    None,
    Minor,
    Moderate,
    Major,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::None => write!(f, "none"),
            Category::Minor => write!(f, "minor"),
            Category::Moderate => write!(f, "moderate"),
            Category::Major => write!(f, "major"),
        }
    }
}

/// Where an event's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Observed,
    Forecast,
}

/// A cached peak event.
///
/// `key` is the identity used by the cache: the observed time for plain
/// local-maxima peaks, or the originating crest time for crest-anchored
/// events. It never changes once an event has been cached, even when a
/// rerun finds a better observed maximum for the same crest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub observed_time: DateTime<Utc>,
    pub value: f64,
    pub category: Category,
    pub key: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<SourceTag>,
}

impl Event {
    /// An unclassified event whose identity is its own observed time.
    pub fn at_sample(sample: &Sample) -> Self {
        Self::anchored(sample, sample.timestamp)
    }

    /// An unclassified event observed at `sample` but identified by `key`.
    pub fn anchored(sample: &Sample, key: DateTime<Utc>) -> Self {
        Self {
            observed_time: sample.timestamp,
            value: sample.value,
            category: Category::None,
            key,
            source_tag: None,
        }
    }

    pub fn with_source(mut self, source: SourceTag) -> Self {
        self.source_tag = Some(source);
        self
    }
}

// ---------------------------------------------------------------------------
// Threshold types
// ---------------------------------------------------------------------------

/// Flood category thresholds for a site, in the site's target datum.
///
/// Levels in ascending order: minor < moderate < major. The ordering is
/// enforced by `Thresholds::new` and on deserialization, so a `Thresholds`
/// value in hand is always a valid ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct Thresholds {
    minor: f64,
    moderate: f64,
    major: f64,
}

#[derive(Deserialize)]
struct RawThresholds {
    minor: f64,
    moderate: f64,
    major: f64,
}

impl TryFrom<RawThresholds> for Thresholds {
    type Error = ConfigError;

    fn try_from(raw: RawThresholds) -> Result<Self, Self::Error> {
        Thresholds::new(raw.minor, raw.moderate, raw.major)
    }
}

impl Thresholds {
    pub fn new(minor: f64, moderate: f64, major: f64) -> Result<Self, ConfigError> {
        let finite = minor.is_finite() && moderate.is_finite() && major.is_finite();
        if !finite || minor >= moderate || moderate >= major {
            return Err(ConfigError::InvalidThresholds { minor, moderate, major });
        }
        Ok(Self { minor, moderate, major })
    }

    pub fn minor(&self) -> f64 {
        self.minor
    }

    pub fn moderate(&self) -> f64 {
        self.moderate
    }

    pub fn major(&self) -> f64 {
        self.major
    }
}

// ---------------------------------------------------------------------------
// Vertical datum
// ---------------------------------------------------------------------------

/// Target vertical datum for a site and the linear offset that converts the
/// provider's native datum into it (e.g. MLLW → NAVD88 at a given station).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub name: String,
    #[serde(default)]
    pub offset: f64,
}

impl Datum {
    pub fn new(name: impl Into<String>, offset: f64) -> Self {
        Self { name: name.into(), offset }
    }

    pub fn convert(&self, raw: f64) -> f64 {
        raw + self.offset
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Configuration problems. Always fatal, always raised before any cache is
/// mutated.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("thresholds must be finite and strictly increasing, got minor={minor} moderate={moderate} major={major}")]
    InvalidThresholds { minor: f64, moderate: f64, major: f64 },

    #[error("inner window ({inner_minutes} min) must be positive and no wider than outer window ({outer_minutes} min)")]
    InvalidCrestWindows { inner_minutes: i64, outer_minutes: i64 },

    #[error("invalid peak detector setting: {0}")]
    InvalidPeakConfig(String),

    #[error("invalid backfill years {start}..={end}: {reason}")]
    InvalidYearRange { start: i32, end: i32, reason: String },

    #[error("unknown site: {0}")]
    UnknownSite(String),

    #[error("site {site} uses crest-anchored detection but has no crest station")]
    MissingCrestStation { site: String },

    #[error("settings error: {0}")]
    Settings(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

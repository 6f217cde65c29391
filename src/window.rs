/// Run modes and the time window each mode examines.
///
/// A run is either incremental (pick up where the last run stopped, with a
/// trailing buffer) or a backfill over explicit calendar years. The mode is
/// chosen once per invocation; nothing inside a run changes it.
///
/// # Clock injection
/// `compute_window` takes `now` as a parameter instead of calling
/// `Utc::now()`, so window math is deterministic in tests.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::model::ConfigError;

/// Earliest year a backfill may request.
pub const MIN_BACKFILL_YEAR: i32 = 1900;

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Incremental,
    BackfillYear(i32),
    /// Inclusive on both ends: `BackfillRange { start: 2020, end: 2022 }`
    /// covers three calendar years.
    BackfillRange { start: i32, end: i32 },
}

impl RunMode {
    pub fn is_backfill(&self) -> bool {
        !matches!(self, RunMode::Incremental)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Incremental => write!(f, "incremental"),
            RunMode::BackfillYear(y) => write!(f, "backfill {}", y),
            RunMode::BackfillRange { start, end } => write!(f, "backfill {}-{}", start, end),
        }
    }
}

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// The span of data a run examines.
///
/// Incremental windows include their end (`now`); backfill windows are
/// half-open and stop just before January 1 of the following year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub end_inclusive: bool,
}

impl TimeWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && (t < self.end || (self.end_inclusive && t == self.end))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}{}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            if self.end_inclusive { "]" } else { ")" }
        )
    }
}

/// Bookkeeping inputs for incremental windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Trailing margin re-examined before the previous watermark, so peaks
    /// straddling the last run's boundary are not missed.
    pub buffer: Duration,
    /// How far back a first incremental run looks when the cache has no
    /// watermark yet.
    pub initial_lookback: Duration,
}

/// Midnight UTC on January 1 of `year`.
pub fn start_of_year(year: i32) -> Result<DateTime<Utc>, ConfigError> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| ConfigError::InvalidYearRange {
            start: year,
            end: year,
            reason: "year is not representable".to_string(),
        })
}

fn validate_years(start: i32, end: i32, now: DateTime<Utc>) -> Result<(), ConfigError> {
    let reason = if start > end {
        Some("start year is after end year".to_string())
    } else if start < MIN_BACKFILL_YEAR {
        Some(format!("years before {} are not supported", MIN_BACKFILL_YEAR))
    } else if end > now.year() {
        Some(format!("end year is after the current year {}", now.year()))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidYearRange { start, end, reason }),
        None => Ok(()),
    }
}

/// Computes the window a run should examine.
///
/// `last_processed` is only consulted for incremental runs; backfills ignore
/// it entirely.
pub fn compute_window(
    mode: RunMode,
    last_processed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &WindowConfig,
) -> Result<TimeWindow, ConfigError> {
    match mode {
        RunMode::Incremental => {
            let start = match last_processed {
                Some(last) => last - config.buffer,
                None => now - config.initial_lookback,
            };
            Ok(TimeWindow {
                start: start.min(now),
                end: now,
                end_inclusive: true,
            })
        }
        RunMode::BackfillYear(year) => backfill_window(year, year, now),
        RunMode::BackfillRange { start, end } => backfill_window(start, end, now),
    }
}

fn backfill_window(start: i32, end: i32, now: DateTime<Utc>) -> Result<TimeWindow, ConfigError> {
    validate_years(start, end, now)?;
    Ok(TimeWindow {
        start: start_of_year(start)?,
        end: start_of_year(end + 1)?,
        end_inclusive: false,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

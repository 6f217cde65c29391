/// Structured logging for the tide peak cache service
///
/// Every line carries the data source it concerns and, where relevant, the
/// site identifier, so a scheduled run's log can be grepped per site. Output
/// goes through the `log` facade; `init_logger` installs `env_logger` with
/// the service's line format, optionally mirroring every line into a file
/// for cron runs. `RUST_LOG` still overrides the configured level.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use log::{Level, LevelFilter};

use crate::ingest::IngestError;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Noaa,
    Replay,
    Cache,
    Analysis,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Noaa => write!(f, "NOAA"),
            DataSource::Replay => write!(f, "REPLAY"),
            DataSource::Cache => write!(f, "CACHE"),
            DataSource::Analysis => write!(f, "ANALYSIS"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - station offline or product not offered
    Expected,
    /// Unexpected failure - service degradation, API change or bug
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a provider failure.
pub fn classify_ingest_failure(err: &IngestError) -> FailureType {
    match err {
        IngestError::Api(message) => {
            let message = message.to_ascii_lowercase();
            if message.contains("not offered") || message.contains("wrong station") {
                FailureType::Expected
            } else {
                FailureType::Unknown
            }
        }
        IngestError::Status { status, .. } if *status >= 500 => FailureType::Unexpected,
        IngestError::Status { .. } => FailureType::Unknown,
        IngestError::Http(_) | IngestError::Parse(_) | IngestError::Io { .. } => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Writes every log line to stderr and to a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize the global logger.
///
/// `verbose` lowers the default level to debug. `console_timestamps`
/// prefixes each line with a UTC timestamp, which is what a log file from a
/// cron job wants and an interactive terminal usually does not.
pub fn init_logger(verbose: bool, log_file: Option<&Path>, console_timestamps: bool) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose { LevelFilter::Debug } else { LevelFilter::Info });
    builder.parse_env("RUST_LOG");

    builder.format(move |buf, record| {
        if console_timestamps {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        } else {
            let marker = match record.level() {
                Level::Error => "✗ ",
                Level::Warn => "⚠ ",
                _ => "",
            };
            writeln!(buf, "   {}{}: {}", marker, record.target(), record.args())
        }
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    // A second init (tests, repeated calls) keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

fn emit(level: Level, source: DataSource, site_id: Option<&str>, message: &str) {
    let target = source.to_string();
    match site_id {
        Some(site) => log::log!(target: target.as_str(), level, "[{}] {}", site, message),
        None => log::log!(target: target.as_str(), level, "{}", message),
    }
}

/// Log a general informational message
pub fn info(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Info, source, site_id, message);
}

/// Log a warning message
pub fn warn(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Warn, source, site_id, message);
}

/// Log an error message
pub fn error(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Error, source, site_id, message);
}

/// Log a debug message
pub fn debug(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Debug, source, site_id, message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a provider failure with automatic classification
pub fn log_ingest_failure(source: DataSource, site_id: &str, operation: &str, err: &IngestError) {
    let failure_type = classify_ingest_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, Some(site_id), &message),
        FailureType::Unexpected => error(source, Some(site_id), &message),
        FailureType::Unknown => warn(source, Some(site_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a multi-site run
pub fn log_run_summary(total: usize, successful: usize, failed: usize) {
    let message = format!("Run complete: {}/{} sites successful, {} failed", successful, total, failed);

    if failed == 0 {
        info(DataSource::System, None, &message);
    } else if successful == 0 {
        error(DataSource::System, None, &message);
    } else {
        warn(DataSource::System, None, &message);
    }
}

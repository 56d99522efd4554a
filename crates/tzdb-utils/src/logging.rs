//! # Logging Utilities
//!
//! Logging infrastructure for tzdb using `tracing`.
//!
//! The debugger is interactive: stdout belongs to the command loop, so log
//! output never goes there. Console logs are written to stderr, and a log file
//! can take them instead when the terminal should stay clean.
//!
//! This module provides:
//! - Pretty (human-readable) and JSON output
//! - Environment variable configuration
//! - Log level filtering with `RUST_LOG` directives
//! - File output through a non-blocking writer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tzdb_utils::init_logging;
//!
//! // Reads RUST_LOG, TZDB_LOG_FORMAT and TZDB_LOG_FILE
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::warn!("only warnings and errors are shown by default");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=tzdb_core=trace`); default `warn`
//! - `TZDB_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `TZDB_LOG_FILE`: Log to this file instead of stderr
//!
//! The returned [`LoggingGuard`] flushes buffered file output when dropped, so
//! keep it alive for the lifetime of the program.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "TZDB_LOG_FORMAT";
/// Environment variable naming a log file
pub const LOG_FILE_ENV: &str = "TZDB_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// One JSON object per event, for machine consumption
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level (default)
    #[default]
    Warn,
    /// Info level: target launches, binary loading
    Info,
    /// Debug level: breakpoint installation, trace stops
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl LogLevel
{
    /// Lowercase name, usable as an `EnvFilter` directive
    pub const fn as_str(self) -> &'static str
    {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer alive
///
/// Dropping it flushes and stops the writer thread.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuard
{
    _worker: Option<WorkerGuard>,
}

/// Initialize logging from the environment
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter; defaults to `warn`
/// - `TZDB_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `TZDB_LOG_FILE`: Optional log file; when set, nothing is logged to stderr
///
/// ## Example
///
/// ```rust,no_run
/// use tzdb_utils::init_logging;
///
/// let _guard = init_logging().expect("Failed to initialize logging");
/// tracing::info!("Debugger started");
/// ```
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `TZDB_LOG_FORMAT` holds an unknown format
/// - The log file cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };

    match env::var_os(LOG_FILE_ENV) {
        Some(path) if !path.is_empty() => init(format, None, Some(Path::new(&path))),
        _ => init(format, None, None),
    }
}

/// Initialize stderr logging with an explicit level and format
///
/// The explicit level overrides `RUST_LOG`.
///
/// ## Example
///
/// ```rust,no_run
/// use tzdb_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init(format, Some(level), None)
}

/// Initialize file-only logging
///
/// Keeps the terminal free for the command loop. When `path` is an existing
/// directory, the log goes to `<path>/YYYY-MM-DD-tzdb.log`.
///
/// ## Arguments
///
/// * `path` - Log file or directory
/// * `level` - Optional log level. If `None`, uses `RUST_LOG` or defaults to `warn`.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the file cannot be created.
pub fn init_logging_to_file(path: &Path, level: Option<LogLevel>) -> Result<LoggingGuard, LoggingError>
{
    init(LogFormat::Pretty, level, Some(path))
}

/// Resolve where file logs for `path` are written
///
/// A directory gets a dated file name; anything else is used as is.
pub fn resolve_log_file(path: &Path) -> PathBuf
{
    if path.is_dir() {
        let today = Utc::now().format("%Y-%m-%d");
        path.join(format!("{today}-tzdb.log"))
    } else {
        path.to_path_buf()
    }
}

/// Build the level filter
///
/// Priority:
/// 1. An explicit level (from `--log-level`)
/// 2. `RUST_LOG`, which may carry per-crate directives
/// 3. `warn`
fn build_filter(explicit_level: Option<LogLevel>) -> EnvFilter
{
    if let Some(level) = explicit_level {
        return EnvFilter::new(level.as_str());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(LogLevel::default().as_str()))
}

fn stderr_layer(format: LogFormat) -> BoxedLayer
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_layer(format: LogFormat, path: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let path = resolve_log_file(path);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::FileError(io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name")))?;
    std::fs::create_dir_all(&directory)?;

    // The date is already part of generated names; never roll.
    let appender = tracing_appender::rolling::never(&directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false); // No ANSI in files

    let layer = match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    };
    Ok((layer, guard))
}

fn init(format: LogFormat, level: Option<LogLevel>, file: Option<&Path>) -> Result<LoggingGuard, LoggingError>
{
    let (output, worker) = match file {
        Some(path) => {
            let (layer, guard) = file_layer(format, path)?;
            (layer, Some(guard))
        }
        None => (stderr_layer(format), None),
    };

    Registry::default()
        .with(output)
        .with(build_filter(level))
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;

    Ok(LoggingGuard { _worker: worker })
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("text").unwrap(), LogFormat::Pretty);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(s)) if s == "xml"));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_defaults_and_ordering()
    {
        assert_eq!(LogLevel::default(), LogLevel::Warn);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
        assert!(LogLevel::Error < LogLevel::Trace);
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_resolve_log_file()
    {
        let file = Path::new("/nonexistent/tzdb/session.log");
        assert_eq!(resolve_log_file(file), file.to_path_buf());

        let dir = env::temp_dir();
        let resolved = resolve_log_file(&dir);
        assert_eq!(resolved.parent(), Some(dir.as_path()));
        let name = resolved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-tzdb.log"), "{name}");
        assert_eq!(name.len(), "YYYY-MM-DD-tzdb.log".len());
    }
}

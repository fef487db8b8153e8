//! # Logging Utilities
//!
//! Logging infrastructure for crashd using `tracing`.
//!
//! Reports are written to stdout, so every log line goes to stderr (and
//! optionally a file) to keep the two streams separable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crashd_utils::{init_logging, LogSettings};
//!
//! let settings = LogSettings::from_env().expect("bad logging environment");
//! let _guard = init_logging(&settings).expect("Failed to initialize logging");
//!
//! tracing::info!("daemon started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `RUST_LOG=debug`, `RUST_LOG=crashd_core=trace`),
//!   used when no explicit level is given
//! - `CRASHD_LOG_FORMAT`: `pretty` (default) or `json`
//! - `CRASHD_LOG_FILE`: also write logs to this file, rotated daily. If it names
//!   a directory, a dated `YYYY-MM-DD-crashd.log` is created inside it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    /// Info level (default)
    Info,
    Debug,
    /// Trace level (most verbose)
    Trace,
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
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Everything needed to set up the global subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings
{
    /// Explicit level; `None` defers to `RUST_LOG`, then `info`
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Optional log file (or directory for a dated file)
    pub file: Option<PathBuf>,
}

impl LogSettings
{
    /// Read `CRASHD_LOG_FORMAT` and `CRASHD_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// [`LoggingError::InvalidFormat`] if `CRASHD_LOG_FORMAT` is set to an
    /// unknown format.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        let format = match env::var("CRASHD_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::default(),
        };
        let file = env::var_os("CRASHD_LOG_FILE").map(PathBuf::from);

        Ok(Self {
            level: None,
            format,
            file,
        })
    }
}

/// Keeps the background file writer alive.
///
/// Dropping it flushes and stops file logging, so hold it for the lifetime
/// of the program.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file_writer: Option<WorkerGuard>,
}

/// Install the global `tracing` subscriber.
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - The log file directory cannot be created
pub fn init_logging(settings: &LogSettings) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(settings.format, env_filter(settings.level))];

    let mut file_writer = None;
    if let Some(target) = &settings.file {
        let (dir, file_name) = log_file_location(target);
        std::fs::create_dir_all(&dir).map_err(LoggingError::FileError)?;

        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
        let layer = match settings.format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false) // No ANSI in files
                .with_filter(env_filter(settings.level))
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_current_span(true)
                .with_span_list(true)
                .with_filter(env_filter(settings.level))
                .boxed(),
        };
        layers.push(layer);
        file_writer = Some(guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard {
        _file_writer: file_writer,
    })
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

/// Filter priority: explicit level, then `RUST_LOG`, then `info`.
fn env_filter(level: Option<LogLevel>) -> EnvFilter
{
    match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

/// Split a configured log path into the appender's directory and file name.
fn log_file_location(target: &Path) -> (PathBuf, OsString)
{
    if target.is_dir() {
        let today = Utc::now().format("%Y-%m-%d");
        return (target.to_path_buf(), OsString::from(format!("{today}-crashd.log")));
    }

    let dir = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = target
        .file_name()
        .map_or_else(|| OsString::from("crashd.log"), OsString::from);
    (dir, file_name)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Failed to prepare the log file
    #[error("Failed to create log file: {0}")]
    FileError(#[from] io::Error),
}

//! # crashd Utilities
//!
//! Shared helpers for the crashd workspace.
//!
//! At the moment this is the logging setup: `tracing` subscribers with
//! pretty or JSON output on stderr and an optional log file.

pub mod logging;

// Re-export commonly used logging items for convenience
pub use logging::{init_logging, LogFormat, LogLevel, LogSettings, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};

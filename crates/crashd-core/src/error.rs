//! # Error Types
//!
//! General error handling for the crash daemon.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for crash analysis operations
///
/// ## Error Categories
///
/// 1. **Per-dump errors**: CorruptDump, UnsupportedArchitecture, DumpVanished.
///    The daemon logs these and moves on to the next dump.
/// 2. **Per-object errors**: ObjectLoad. These never leave the resolver; the
///    affected frame is printed with `???` instead.
/// 3. **Environment errors**: Watch, Config. These terminate the daemon.
/// 4. **I/O errors**: Io (for file operations, etc.)
#[derive(Error, Debug)]
pub enum CrashError
{
    /// The file is not a core dump we can read
    ///
    /// This happens when:
    /// - The file cannot be memory-mapped (empty, permission denied)
    /// - The file is not an ELF `ET_CORE` image
    /// - The program headers or notes are truncated
    #[error("Corrupt core dump {}: {reason}", path.display())]
    CorruptDump
    {
        /// Path of the dump that failed to parse
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The dump was produced on a machine type we have no register layout for
    #[error("Unsupported core dump architecture: e_machine {0}")]
    UnsupportedArchitecture(u16),

    /// A binary object backing a memory region could not be loaded
    #[error("Failed to load object {}: {reason}", path.display())]
    ObjectLoad
    {
        /// Resolved path of the object
        path: PathBuf,
        /// Parser or I/O failure description
        reason: String,
    },

    /// The dump disappeared while we were waiting for it to become readable
    #[error("Core dump vanished before it became readable: {}", .0.display())]
    DumpVanished(PathBuf),

    /// The directory event source failed
    ///
    /// This is treated as an environment failure: a daemon whose watcher is
    /// broken would silently miss every crash, so we stop instead.
    #[error("Directory watch failed: {0}")]
    Watch(String),

    /// Invalid daemon configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrashError
{
    /// Build a [`CrashError::CorruptDump`] for `path`.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self
    {
        Self::CorruptDump {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should stop the daemon rather than skip one dump.
    pub fn is_fatal(&self) -> bool
    {
        matches!(self, Self::Watch(_) | Self::Config(_))
    }
}

/// Convenience type alias for `Result<T, CrashError>`
///
/// ```rust
/// use crashd_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, CrashError>;

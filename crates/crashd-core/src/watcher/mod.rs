//! # Directory Watching
//!
//! Sources of "a file appeared in the dump directory" events, and the gate
//! that waits for a new dump to be completely written.
//!
//! ## Backends
//!
//! - [`InotifyWatcher`] (Linux): kernel notifications through `inotify(7)`
//! - [`PollingWatcher`]: rescans the directory at a fixed interval
//!
//! Both only report changes that happen after they were created. Files
//! already present at startup are not reported.

#[cfg(target_os = "linux")]
mod inotify;
mod polling;
mod ready;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub use inotify::InotifyWatcher;
pub use polling::PollingWatcher;
pub use ready::{wait_until_readable, Readiness, READY_MODE_BIT};

use crate::error::{CrashError, Result};

/// What happened to a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind
{
    /// Created in, or moved into, the directory
    ChildAdded,
    /// Deleted from, or moved out of, the directory
    ChildRemoved,
}

/// One change to the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEvent
{
    pub kind: EventKind,
    /// Full path of the child
    pub path: PathBuf,
}

impl DirectoryEvent
{
    pub fn added(path: impl Into<PathBuf>) -> Self
    {
        Self {
            kind: EventKind::ChildAdded,
            path: path.into(),
        }
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self
    {
        Self {
            kind: EventKind::ChildRemoved,
            path: path.into(),
        }
    }
}

/// Blocking source of directory events.
pub trait EventSource
{
    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` means nothing happened in time. Errors mean the source is
    /// broken and will not produce further events.
    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<DirectoryEvent>>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S>
{
    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<DirectoryEvent>>
    {
        (**self).wait_for_event(timeout)
    }
}

/// Which [`EventSource`] implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchBackend
{
    Inotify,
    Polling,
}

impl Default for WatchBackend
{
    fn default() -> Self
    {
        if cfg!(target_os = "linux") {
            WatchBackend::Inotify
        } else {
            WatchBackend::Polling
        }
    }
}

impl fmt::Display for WatchBackend
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            WatchBackend::Inotify => write!(f, "inotify"),
            WatchBackend::Polling => write!(f, "polling"),
        }
    }
}

impl FromStr for WatchBackend
{
    type Err = CrashError;

    fn from_str(value: &str) -> Result<Self>
    {
        match value.to_ascii_lowercase().as_str() {
            "inotify" => Ok(WatchBackend::Inotify),
            "polling" | "poll" => Ok(WatchBackend::Polling),
            other => Err(CrashError::Config(format!("unknown watch backend '{other}'"))),
        }
    }
}

/// Start watching `dir` with the requested backend.
///
/// ## Errors
///
/// [`CrashError::Watch`] if the backend cannot be set up, including asking
/// for inotify on a platform without it.
pub fn watch_directory(dir: &Path, backend: WatchBackend, poll_interval: Duration) -> Result<Box<dyn EventSource>>
{
    match backend {
        #[cfg(target_os = "linux")]
        WatchBackend::Inotify => Ok(Box::new(InotifyWatcher::new(dir)?)),
        #[cfg(not(target_os = "linux"))]
        WatchBackend::Inotify => Err(CrashError::Watch("inotify is only available on Linux".to_string())),
        WatchBackend::Polling => Ok(Box::new(PollingWatcher::new(dir, poll_interval)?)),
    }
}

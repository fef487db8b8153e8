//! Readiness gate for freshly created dumps.
//!
//! Dumps are created unreadable and the producer sets the owner-read bit once
//! the file is complete. Opening earlier would parse a half-written file.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{CrashError, Result};

/// Permission bit that marks a dump as complete.
pub const READY_MODE_BIT: u32 = 0o400;

/// Outcome of [`wait_until_readable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness
{
    Ready,
    /// The timeout passed without the bit being set
    TimedOut,
}

/// Poll `path` every `interval` until its owner-read bit is set.
///
/// With `timeout` of `None` this waits for as long as the file exists.
///
/// ## Errors
///
/// - [`CrashError::DumpVanished`] if the file is removed while waiting
/// - [`CrashError::Io`] for any other failure to stat the file
pub fn wait_until_readable(path: &Path, interval: Duration, timeout: Option<Duration>) -> Result<Readiness>
{
    let started = Instant::now();
    let mut polls: u64 = 0;

    loop {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CrashError::DumpVanished(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };

        if owner_can_read(&metadata) {
            debug!(path = %path.display(), polls, waited_ms = started.elapsed().as_millis(), "dump is readable");
            return Ok(Readiness::Ready);
        }
        if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            return Ok(Readiness::TimedOut);
        }

        polls += 1;
        trace!(path = %path.display(), polls, "dump not readable yet");
        thread::sleep(interval);
    }
}

#[cfg(unix)]
fn owner_can_read(metadata: &fs::Metadata) -> bool
{
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & READY_MODE_BIT != 0
}

#[cfg(not(unix))]
fn owner_can_read(_metadata: &fs::Metadata) -> bool
{
    true
}

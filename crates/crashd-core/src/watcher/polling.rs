//! Portable directory watcher that diffs directory listings.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{DirectoryEvent, EventSource};
use crate::error::{CrashError, Result};

/// Rescans a directory every `interval` and reports what changed.
///
/// A file that is created and deleted between two scans is never seen.
#[derive(Debug)]
pub struct PollingWatcher
{
    dir: PathBuf,
    interval: Duration,
    known: BTreeSet<PathBuf>,
    pending: VecDeque<DirectoryEvent>,
}

impl PollingWatcher
{
    /// Take the initial snapshot of `dir`.
    ///
    /// ## Errors
    ///
    /// [`CrashError::Watch`] if the directory cannot be listed.
    pub fn new(dir: impl AsRef<Path>, interval: Duration) -> Result<Self>
    {
        let dir = dir.as_ref().to_path_buf();
        let known = list(&dir)?;
        debug!(dir = %dir.display(), entries = known.len(), "polling watcher started");

        Ok(Self {
            dir,
            interval: interval.max(Duration::from_millis(1)),
            known,
            pending: VecDeque::new(),
        })
    }

    fn rescan(&mut self) -> Result<()>
    {
        let current = list(&self.dir)?;
        for added in current.difference(&self.known) {
            self.pending.push_back(DirectoryEvent::added(added.clone()));
        }
        for removed in self.known.difference(&current) {
            self.pending.push_back(DirectoryEvent::removed(removed.clone()));
        }
        self.known = current;
        Ok(())
    }
}

impl EventSource for PollingWatcher
{
    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<DirectoryEvent>>
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            self.rescan()?;
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(self.interval.min(deadline - now));
        }
    }
}

fn list(dir: &Path) -> Result<BTreeSet<PathBuf>>
{
    let entries =
        fs::read_dir(dir).map_err(|err| CrashError::Watch(format!("cannot list {}: {err}", dir.display())))?;

    let mut paths = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| CrashError::Watch(format!("cannot list {}: {err}", dir.display())))?;
        paths.insert(entry.path());
    }
    Ok(paths)
}

//! inotify-backed directory watcher.

use std::collections::VecDeque;
use std::ffi::{CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::{DirectoryEvent, EventSource};
use crate::error::{CrashError, Result};

const ADDED_MASK: u32 = libc::IN_CREATE | libc::IN_MOVED_TO;
const REMOVED_MASK: u32 = libc::IN_DELETE | libc::IN_MOVED_FROM;
const GONE_MASK: u32 = libc::IN_IGNORED | libc::IN_DELETE_SELF | libc::IN_UNMOUNT;

/// `struct inotify_event` without the trailing name.
const EVENT_HEADER_LEN: usize = 16;

/// Room for many events per `read(2)`.
const READ_BUFFER_LEN: usize = 64 * 1024;

/// Watches one directory through an inotify descriptor.
///
/// The descriptor is non-blocking; waiting happens in `poll(2)` so the
/// timeout is honoured even when no event arrives.
#[derive(Debug)]
pub struct InotifyWatcher
{
    fd: OwnedFd,
    dir: PathBuf,
    pending: VecDeque<DirectoryEvent>,
    buffer: Vec<u8>,
}

impl InotifyWatcher
{
    /// Start watching `dir` for children being added and removed.
    ///
    /// ## Errors
    ///
    /// [`CrashError::Watch`] if inotify is unavailable or the directory
    /// cannot be watched.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self>
    {
        let dir = dir.as_ref().to_path_buf();

        // SAFETY: plain syscall, no pointers involved.
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(watch_error("inotify_init1", &io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|_| CrashError::Watch(format!("path contains a NUL byte: {}", dir.display())))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let wd = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), ADDED_MASK | REMOVED_MASK) };
        if wd < 0 {
            let err = io::Error::last_os_error();
            return Err(CrashError::Watch(format!("cannot watch {}: {err}", dir.display())));
        }

        debug!(dir = %dir.display(), "inotify watch installed");
        Ok(Self {
            fd,
            dir,
            pending: VecDeque::new(),
            buffer: vec![0; READ_BUFFER_LEN],
        })
    }

    /// Block in `poll(2)` for up to `timeout`. Returns whether data is ready.
    fn poll_readable(&self, timeout: Duration) -> Result<bool>
    {
        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: `pollfd` is a valid array of one element.
        let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(watch_error("poll", &err));
        }
        Ok(ready > 0)
    }

    /// Drain the descriptor into `pending`.
    fn read_events(&mut self) -> Result<()>
    {
        // SAFETY: the buffer is valid for writes of `len` bytes.
        let read = unsafe { libc::read(self.fd.as_raw_fd(), self.buffer.as_mut_ptr().cast(), self.buffer.len()) };
        if read < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(()),
                _ => Err(watch_error("read", &err)),
            };
        }

        let len = usize::try_from(read).unwrap_or(0);
        for raw in parse_events(&self.buffer[..len]) {
            if raw.mask & libc::IN_Q_OVERFLOW != 0 {
                warn!(dir = %self.dir.display(), "inotify queue overflowed; some dumps may be missed");
            }
            if raw.mask & GONE_MASK != 0 {
                return Err(CrashError::Watch(format!(
                    "watched directory {} was removed",
                    self.dir.display()
                )));
            }
            if raw.name.is_empty() {
                continue;
            }

            let path = self.dir.join(OsStr::from_bytes(raw.name));
            if raw.mask & ADDED_MASK != 0 {
                self.pending.push_back(DirectoryEvent::added(path));
            } else if raw.mask & REMOVED_MASK != 0 {
                self.pending.push_back(DirectoryEvent::removed(path));
            }
        }
        Ok(())
    }
}

impl EventSource for InotifyWatcher
{
    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<DirectoryEvent>>
    {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.poll_readable(timeout)? {
            self.read_events()?;
        }
        Ok(self.pending.pop_front())
    }
}

fn watch_error(call: &str, err: &io::Error) -> CrashError
{
    CrashError::Watch(format!("{call} failed: {err}"))
}

/// One record from the inotify stream.
#[derive(Debug, PartialEq, Eq)]
struct RawEvent<'a>
{
    mask: u32,
    name: &'a [u8],
}

/// Split a `read(2)` result into records. A partial trailing record is dropped.
fn parse_events(bytes: &[u8]) -> Vec<RawEvent<'_>>
{
    let field = |offset: usize| -> Option<u32> {
        let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
        Some(u32::from_ne_bytes(raw))
    };

    let mut events = Vec::new();
    let mut offset = 0;
    while let (Some(mask), Some(name_len)) = (field(offset + 4), field(offset + 12)) {
        let name_start = offset + EVENT_HEADER_LEN;
        let Some(name_end) = usize::try_from(name_len).ok().and_then(|len| name_start.checked_add(len)) else {
            break;
        };
        let Some(name) = bytes.get(name_start..name_end) else {
            break;
        };
        let name = name.split(|&byte| byte == 0).next().unwrap_or_default();
        events.push(RawEvent { mask, name });
        offset = name_end;
    }
    events
}

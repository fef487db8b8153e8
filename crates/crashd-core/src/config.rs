//! # Daemon Configuration
//!
//! Settings for the watch loop, the resolver and the walker.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. [`DaemonConfig::default`]
//! 2. `CRASHD_*` environment variables ([`DaemonConfig::from_env`])
//! 3. Command-line flags (applied by the binary)
//!
//! ## Environment Variables
//!
//! - `CRASHD_WATCH_DIR`: directory to watch (default `/tmp/coredump`)
//! - `CRASHD_LIBRARY_DIR`: where bare `.so` names live (default `/usr/lib`)
//! - `CRASHD_LOADER_MARKER`: region-name marker of the dynamic loader (default `Loader.so`)
//! - `CRASHD_MAX_FRAMES`: frame ceiling per thread (default 256)
//! - `CRASHD_READY_TIMEOUT_SECS`: readiness wait limit, `0` waits forever (default 60)
//! - `CRASHD_WATCH_BACKEND`: `inotify` or `polling`

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backtrace::DEFAULT_MAX_FRAMES;
use crate::error::{CrashError, Result};
use crate::symbols::{DEFAULT_LIBRARY_DIR, DEFAULT_LOADER_MARKER};
use crate::watcher::WatchBackend;

/// Directory the kernel (or the test harness) drops core dumps into.
pub const DEFAULT_WATCH_DIR: &str = "/tmp/coredump";

/// Interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the loop blocks on the event source before rechecking shutdown.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_millis(250);

/// Full daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig
{
    pub watch_dir: PathBuf,
    pub library_dir: PathBuf,
    pub loader_marker: String,
    pub max_frames: usize,
    /// Readiness poll interval, also used by the polling watcher
    pub poll_interval: Duration,
    /// `None` waits for readiness indefinitely
    pub ready_timeout: Option<Duration>,
    pub event_timeout: Duration,
    /// Drop cached objects whose file changed, between dumps
    pub evict_stale: bool,
    pub backend: WatchBackend,
}

impl Default for DaemonConfig
{
    fn default() -> Self
    {
        Self {
            watch_dir: PathBuf::from(DEFAULT_WATCH_DIR),
            library_dir: PathBuf::from(DEFAULT_LIBRARY_DIR),
            loader_marker: DEFAULT_LOADER_MARKER.to_string(),
            max_frames: DEFAULT_MAX_FRAMES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: Some(DEFAULT_READY_TIMEOUT),
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            evict_stale: false,
            backend: WatchBackend::default(),
        }
    }
}

impl DaemonConfig
{
    /// Defaults overridden by `CRASHD_*` environment variables.
    ///
    /// ## Errors
    ///
    /// [`CrashError::Config`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self>
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("CRASHD_WATCH_DIR") {
            config.watch_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CRASHD_LIBRARY_DIR") {
            config.library_dir = PathBuf::from(dir);
        }
        if let Some(marker) = lookup("CRASHD_LOADER_MARKER") {
            config.loader_marker = marker;
        }
        if let Some(value) = lookup("CRASHD_MAX_FRAMES") {
            config.max_frames = parse_var("CRASHD_MAX_FRAMES", &value)?;
        }
        if let Some(value) = lookup("CRASHD_READY_TIMEOUT_SECS") {
            config.ready_timeout = ready_timeout_from_secs(parse_var("CRASHD_READY_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("CRASHD_WATCH_BACKEND") {
            config.backend = value.parse()?;
        }

        Ok(config)
    }

    /// Check invariants the daemon relies on.
    ///
    /// ## Errors
    ///
    /// [`CrashError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()>
    {
        if self.watch_dir.as_os_str().is_empty() {
            return Err(CrashError::Config("watch directory must not be empty".to_string()));
        }
        if self.loader_marker.is_empty() {
            return Err(CrashError::Config("loader marker must not be empty".to_string()));
        }
        if self.max_frames == 0 {
            return Err(CrashError::Config("max frames must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(CrashError::Config("poll interval must be positive".to_string()));
        }
        if self.event_timeout.is_zero() {
            return Err(CrashError::Config("event timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// `0` means "no timeout".
pub fn ready_timeout_from_secs(secs: u64) -> Option<Duration>
{
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| CrashError::Config(format!("{name}={value:?}: {err}")))
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
    {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults()
    {
        let config = DaemonConfig::default();
        assert_eq!(config.watch_dir, PathBuf::from("/tmp/coredump"));
        assert_eq!(config.library_dir, PathBuf::from("/usr/lib"));
        assert_eq!(config.loader_marker, "Loader.so");
        assert_eq!(config.max_frames, 256);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.ready_timeout, Some(Duration::from_secs(60)));
        assert!(!config.evict_stale);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides()
    {
        let config = DaemonConfig::from_lookup(lookup(&[
            ("CRASHD_WATCH_DIR", "/var/crash"),
            ("CRASHD_LIBRARY_DIR", "/lib64"),
            ("CRASHD_LOADER_MARKER", "ld-linux"),
            ("CRASHD_MAX_FRAMES", " 64 "),
            ("CRASHD_READY_TIMEOUT_SECS", "0"),
            ("CRASHD_WATCH_BACKEND", "polling"),
        ]))
        .unwrap();

        assert_eq!(config.watch_dir, PathBuf::from("/var/crash"));
        assert_eq!(config.library_dir, PathBuf::from("/lib64"));
        assert_eq!(config.loader_marker, "ld-linux");
        assert_eq!(config.max_frames, 64);
        assert_eq!(config.ready_timeout, None);
        assert_eq!(config.backend, WatchBackend::Polling);
    }

    #[test]
    fn test_bad_number_is_config_error()
    {
        let err = DaemonConfig::from_lookup(lookup(&[("CRASHD_MAX_FRAMES", "lots")])).unwrap_err();
        assert!(matches!(err, CrashError::Config(message) if message.contains("CRASHD_MAX_FRAMES")));
    }

    #[test]
    fn test_validate_rejects_degenerate_values()
    {
        let mut config = DaemonConfig {
            max_frames: 0,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());

        config.max_frames = 1;
        config.loader_marker.clear();
        assert!(config.validate().is_err());

        config.loader_marker = "Loader.so".to_string();
        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}

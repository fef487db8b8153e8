//! # Crash Daemon
//!
//! The watch loop: wait for a dump to appear, wait for it to be complete,
//! walk every thread, print the report, repeat.
//!
//! ## Failure policy
//!
//! - A bad dump (corrupt, vanished, never became readable) is logged and
//!   skipped. The next dump is processed normally.
//! - A broken event source stops the loop with an error, since a daemon
//!   that cannot see new files would silently miss every crash.
//!
//! ## Example
//!
//! ```rust,no_run
//! use crashd_core::watcher::watch_directory;
//! use crashd_core::{CrashDaemon, DaemonConfig};
//!
//! fn main() -> crashd_core::Result<()>
//! {
//!     let config = DaemonConfig::from_env()?;
//!     let mut daemon = CrashDaemon::new(config)?;
//!     daemon.prepare_watch_dir()?;
//!
//!     let mut source = watch_directory(&daemon.config().watch_dir, daemon.config().backend, daemon.config().poll_interval)?;
//!     daemon.run(&mut source, &mut std::io::stdout())
//! }
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backtrace::{BacktraceReport, BacktraceWalker};
use crate::config::DaemonConfig;
use crate::coredump::CoreDumpSession;
use crate::error::{CrashError, Result};
use crate::symbols::ObjectResolver;
use crate::watcher::{wait_until_readable, EventKind, EventSource, Readiness};

type DumpOpener = Box<dyn Fn(&Path) -> Result<CoreDumpSession>>;

/// Long-running crash analyser.
pub struct CrashDaemon
{
    config: DaemonConfig,
    resolver: ObjectResolver,
    shutdown: Arc<AtomicBool>,
    open_dump: DumpOpener,
    dumps_processed: u64,
}

impl CrashDaemon
{
    /// Build a daemon from a validated configuration.
    ///
    /// ## Errors
    ///
    /// [`CrashError::Config`] if `config` fails validation.
    pub fn new(config: DaemonConfig) -> Result<Self>
    {
        config.validate()?;
        let resolver = ObjectResolver::new(config.library_dir.clone(), config.loader_marker.clone());

        Ok(Self {
            config,
            resolver,
            shutdown: Arc::new(AtomicBool::new(false)),
            open_dump: Box::new(|path: &Path| CoreDumpSession::open(path)),
            dumps_processed: 0,
        })
    }

    /// Replace how dump files are turned into sessions.
    #[must_use]
    pub fn with_dump_opener(mut self, opener: impl Fn(&Path) -> Result<CoreDumpSession> + 'static) -> Self
    {
        self.open_dump = Box::new(opener);
        self
    }

    pub fn config(&self) -> &DaemonConfig
    {
        &self.config
    }

    /// Shared object cache, for inspection.
    pub fn resolver(&self) -> &ObjectResolver
    {
        &self.resolver
    }

    /// Flag that stops [`run`](Self::run) at its next wait boundary.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool>
    {
        Arc::clone(&self.shutdown)
    }

    /// Number of dumps that produced a report.
    pub fn dumps_processed(&self) -> u64
    {
        self.dumps_processed
    }

    /// Create the watched directory if it does not exist yet.
    ///
    /// ## Errors
    ///
    /// [`CrashError::Watch`] if the directory cannot be created.
    pub fn prepare_watch_dir(&self) -> Result<()>
    {
        let dir = &self.config.watch_dir;
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o777);
        }
        builder
            .create(dir)
            .map_err(|err| CrashError::Watch(format!("cannot create {}: {err}", dir.display())))
    }

    /// Process events from `source` until shutdown is requested.
    ///
    /// Reports are written to `output`; everything else goes to the log.
    ///
    /// ## Errors
    ///
    /// Only failures of `source` itself are returned.
    pub fn run<S, W>(&mut self, source: &mut S, output: &mut W) -> Result<()>
    where
        S: EventSource + ?Sized,
        W: Write + ?Sized,
    {
        info!(
            dir = %self.config.watch_dir.display(),
            backend = %self.config.backend,
            "watching for core dumps"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(event) = source.wait_for_event(self.config.event_timeout)? else {
                continue;
            };

            match event.kind {
                EventKind::ChildAdded => self.handle_new_dump(&event.path, output),
                EventKind::ChildRemoved => debug!(path = %event.path.display(), "coredump file removed"),
            }
        }

        let stats = self.resolver.stats();
        info!(
            dumps = self.dumps_processed,
            cached_objects = self.resolver.cached_objects(),
            cache_hits = stats.hits,
            cache_loads = stats.loads,
            "shutting down"
        );
        Ok(())
    }

    /// Open one dump and walk all its threads.
    ///
    /// ## Errors
    ///
    /// Whatever opening the dump returns: [`CrashError::CorruptDump`],
    /// [`CrashError::UnsupportedArchitecture`], or I/O errors.
    pub fn process_dump(&mut self, path: &Path) -> Result<BacktraceReport>
    {
        let session = (self.open_dump)(path)?;
        let mut report = BacktraceWalker::new(&session, &mut self.resolver, self.config.max_frames).report();
        report.dump_path.get_or_insert_with(|| path.to_path_buf());

        let frames: usize = report.threads.iter().map(|thread| thread.frames.len()).sum();
        info!(
            path = %path.display(),
            threads = report.threads.len(),
            frames,
            "generated backtrace"
        );
        Ok(report)
    }

    fn handle_new_dump<W: Write + ?Sized>(&mut self, path: &Path, output: &mut W)
    {
        info!(path = %path.display(), "new coredump file");

        match wait_until_readable(path, self.config.poll_interval, self.config.ready_timeout) {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::TimedOut) => {
                warn!(path = %path.display(), "coredump never became readable, skipping");
                return;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "gave up waiting for coredump");
                return;
            }
        }

        if self.config.evict_stale {
            self.resolver.evict_stale();
        }

        let report = match self.process_dump(path) {
            Ok(report) => report,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to analyse coredump");
                return;
            }
        };

        if let Err(err) = write!(output, "{report}").and_then(|()| output.flush()) {
            error!(path = %path.display(), error = %err, "failed to write backtrace");
            return;
        }
        self.dumps_processed += 1;
    }
}

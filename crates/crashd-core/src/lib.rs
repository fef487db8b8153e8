//! # crashd-core
//!
//! Postmortem crash analysis for crashd.
//!
//! This crate turns core dumps into symbolicated, per-thread backtraces:
//! - Core dump sessions (memory regions, thread registers, bounds-checked reads)
//! - Object resolution with a process-wide cache of parsed binaries
//! - Symbol and source-line lookup through `object` and `addr2line`
//! - Frame-pointer stack walking that survives corrupt stacks
//! - Directory watching and the daemon loop that ties it together
//!
//! ## Why unsafe code is needed
//!
//! Core dumps and binary objects are memory-mapped (`memmap2`), and the Linux
//! watcher talks to inotify through `libc`. Both are `unsafe` at the call site.
//! Everything above those two seams is safe code.

#![allow(unsafe_code)] // Required for mmap and inotify

pub mod backtrace;
pub mod config;
pub mod coredump;
pub mod daemon;
pub mod error;
pub mod symbols;
pub mod types;
pub mod watcher;

pub use backtrace::{BacktraceReport, BacktraceWalker, ThreadBacktrace};
pub use config::DaemonConfig;
pub use coredump::{CoreDumpSession, CoreImage};
pub use daemon::CrashDaemon;
// Re-export commonly used types
pub use error::{CrashError, Result};
pub use symbols::{LoadedObject, ObjectResolver};
pub use types::{Address, Architecture, MemoryRegion, ThreadSnapshot};

//! # Backtrace Walker
//!
//! Frame-pointer stack walking over a [`CoreDumpSession`].
//!
//! ## How the walk works
//!
//! Starting from the crashed thread's `pc` and `fp`:
//!
//! 1. Symbolicate `pc` and emit a frame (unless it belongs to the loader).
//!    Caller frames hold return addresses, which point just past the call,
//!    so they are symbolicated at `pc - 1`.
//! 2. Read the saved return address at `fp + word` and the caller's frame
//!    pointer at `fp`.
//! 3. Repeat with those until `pc` is zero, a read fails, or the frame
//!    ceiling is reached.
//!
//! Every value the walk follows comes from the dump and may be garbage. The
//! walk never panics on it: unreadable memory ends the walk, unknown
//! addresses become `???` frames, and loops are cut off by the ceiling.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use crate::coredump::CoreDumpSession;
use crate::symbols::ObjectResolver;
use crate::types::{Address, BacktraceFrame, ThreadId, ThreadSnapshot};

/// Default limit on frames per thread.
pub const DEFAULT_MAX_FRAMES: usize = 256;

/// The walked stack of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBacktrace
{
    /// Position of the thread in the dump
    pub index: usize,
    pub tid: ThreadId,
    /// Innermost frame first
    pub frames: Vec<BacktraceFrame>,
    /// Whether the walk stopped at the frame ceiling
    pub truncated: bool,
}

impl fmt::Display for ThreadBacktrace
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "Backtrace for thread #{}, tid={}", self.index, self.tid)?;
        for frame in &self.frames {
            writeln!(f, "{frame}")?;
        }
        Ok(())
    }
}

/// Backtraces of every thread in one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceReport
{
    pub dump_path: Option<PathBuf>,
    pub threads: Vec<ThreadBacktrace>,
}

impl fmt::Display for BacktraceReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for thread in &self.threads {
            write!(f, "{thread}")?;
        }
        Ok(())
    }
}

/// Frame-pointer walker bound to one session and the daemon's resolver.
pub struct BacktraceWalker<'a>
{
    session: &'a CoreDumpSession,
    resolver: &'a mut ObjectResolver,
    max_frames: usize,
    /// Lowest region start per object name.
    load_bases: HashMap<String, Address>,
}

impl<'a> BacktraceWalker<'a>
{
    pub fn new(session: &'a CoreDumpSession, resolver: &'a mut ObjectResolver, max_frames: usize) -> Self
    {
        let mut load_bases: HashMap<String, Address> = HashMap::new();
        for region in session.regions() {
            if let Some(name) = resolver.object_name(region) {
                load_bases
                    .entry(name)
                    .and_modify(|base| *base = (*base).min(region.start))
                    .or_insert(region.start);
            }
        }

        Self {
            session,
            resolver,
            max_frames,
            load_bases,
        }
    }

    /// Walk every thread in dump order.
    pub fn walk_all(&mut self) -> Vec<ThreadBacktrace>
    {
        let session = self.session;
        session
            .threads()
            .iter()
            .enumerate()
            .map(|(index, thread)| self.walk(index, thread))
            .collect()
    }

    /// Walk all threads and package the result with the dump path.
    pub fn report(&mut self) -> BacktraceReport
    {
        BacktraceReport {
            dump_path: self.session.path().map(PathBuf::from),
            threads: self.walk_all(),
        }
    }

    /// Walk one thread's stack.
    pub fn walk(&mut self, index: usize, thread: &ThreadSnapshot) -> ThreadBacktrace
    {
        let word = self.session.architecture().word_size() as u64;
        let mut pc = thread.registers.pc;
        let mut fp = thread.registers.fp;
        let mut frames = Vec::new();
        let mut truncated = false;
        let mut steps = 0;

        while !pc.is_zero() {
            if steps == self.max_frames {
                warn!(
                    tid = %thread.tid,
                    max_frames = self.max_frames,
                    "frame limit reached, backtrace truncated"
                );
                truncated = true;
                break;
            }
            let is_caller = steps > 0;
            steps += 1;

            if let Some(frame) = self.resolve_frame(pc, is_caller) {
                frames.push(frame);
            }

            let Some(return_slot) = fp.checked_add(word) else {
                break;
            };
            let (Some(next_pc), Some(next_fp)) = (self.session.read_word(return_slot), self.session.read_word(fp))
            else {
                trace!(tid = %thread.tid, fp = %fp, "frame chain ends in unreadable memory");
                break;
            };
            pc = Address::from(next_pc);
            fp = Address::from(next_fp);
        }

        debug!(tid = %thread.tid, frames = frames.len(), truncated, "walked thread");
        ThreadBacktrace {
            index,
            tid: thread.tid,
            frames,
            truncated,
        }
    }

    /// Symbolicate one pc. `None` means the frame is hidden (loader code).
    ///
    /// Region and object are chosen by `pc` itself; only the symbol and line
    /// lookup uses `pc - 1` for caller frames.
    fn resolve_frame(&mut self, pc: Address, is_caller: bool) -> Option<BacktraceFrame>
    {
        let session = self.session;
        let Some(region) = session.region_containing(pc) else {
            return Some(BacktraceFrame::unknown(pc, None));
        };
        let Some(object_name) = self.resolver.object_name(region) else {
            return Some(BacktraceFrame::unknown(pc, Some(region.id)));
        };
        if self.resolver.is_loader(&object_name) {
            trace!(pc = %pc, "skipping loader frame");
            return None;
        }

        let mut frame = BacktraceFrame {
            pc,
            region: Some(region.id),
            object_name: None,
            symbol: None,
            location: None,
        };

        if let Some(object) = self.resolver.resolve(region) {
            let load_base = self.load_bases.get(&object_name).copied().unwrap_or(region.start);
            let lookup = if is_caller { pc.checked_sub(1).unwrap_or(pc) } else { pc };
            if let Some(offset) = object.offset_of(lookup.value(), load_base.value()) {
                let info = object.debug_info();
                frame.symbol = info.symbol_at(offset);
                frame.location = info.source_position_at(offset);
            }
        }

        frame.object_name = Some(object_name);
        Some(frame)
    }
}

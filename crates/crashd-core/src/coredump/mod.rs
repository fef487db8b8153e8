//! # Core Dump Session
//!
//! A session is one opened core dump: its memory regions, its thread register
//! snapshots, and bounds-checked access to the memory it captured.
//!
//! The byte-level format lives behind the [`CoreImage`] trait.
//! [`ElfCoreImage`] reads Linux-style ELF cores; [`SyntheticCore`] builds an
//! image in memory, which is what the walker tests run against.
//!
//! ## Safety against corrupt input
//!
//! Every address handed to a session may come from a corrupt stack. Both
//! [`CoreDumpSession::region_containing`] and [`CoreDumpSession::read_word`]
//! answer `None` for anything they cannot serve; neither panics.
//!
//! ```rust
//! use crashd_core::coredump::{CoreDumpSession, SyntheticCore};
//! use crashd_core::types::{Address, Architecture};
//!
//! let image = SyntheticCore::new(Architecture::X86)
//!     .with_region("main:200-300", 0x200, 0x300)
//!     .with_word(0x250, 0xdead);
//! let session = CoreDumpSession::from_image(image);
//!
//! assert_eq!(session.read_word(Address::from(0x250)), Some(0xdead));
//! assert_eq!(session.read_word(Address::from(0x2fe)), None); // straddles the end
//! assert!(session.region_containing(Address::from(0x10)).is_none());
//! ```

mod elf;
mod synthetic;

use std::fmt;
use std::path::{Path, PathBuf};

pub use elf::ElfCoreImage;
pub use synthetic::SyntheticCore;
use tracing::debug;

use crate::error::Result;
use crate::types::{Address, Architecture, ByteOrder, MemoryRegion, ThreadSnapshot};

/// Structured view of a core dump, independent of its on-disk format.
pub trait CoreImage
{
    /// Architecture of the crashed process.
    fn architecture(&self) -> Architecture;

    /// Byte order of words in captured memory.
    fn byte_order(&self) -> ByteOrder;

    /// Memory regions in dump order.
    fn regions(&self) -> &[MemoryRegion];

    /// Thread snapshots in dump order.
    fn threads(&self) -> &[ThreadSnapshot];

    /// Exactly `len` captured bytes starting at `address`.
    ///
    /// Returns `None` if any byte of the range is unmapped or was not
    /// captured in the dump.
    fn read_memory(&self, address: Address, len: usize) -> Option<&[u8]>;
}

/// One opened core dump.
///
/// Regions and threads are read once when the image is created and never
/// change afterwards, so a session can be shared freely by reference.
pub struct CoreDumpSession
{
    path: Option<PathBuf>,
    image: Box<dyn CoreImage>,
    /// Region indices sorted by start address.
    by_start: Vec<usize>,
}

impl CoreDumpSession
{
    /// Open and parse the core dump at `path`.
    ///
    /// ## Errors
    ///
    /// Returns [`CrashError::CorruptDump`](crate::CrashError::CorruptDump) if
    /// the file cannot be mapped or is not a core dump, and
    /// [`CrashError::UnsupportedArchitecture`](crate::CrashError::UnsupportedArchitecture)
    /// for machine types without a register layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let image = ElfCoreImage::open(path)?;
        let mut session = Self::from_image(image);
        session.path = Some(path.to_path_buf());
        Ok(session)
    }

    /// Wrap an already-parsed image.
    pub fn from_image(image: impl CoreImage + 'static) -> Self
    {
        let regions = image.regions();
        let mut by_start: Vec<usize> = (0..regions.len()).collect();
        by_start.sort_by_key(|&index| regions[index].start);

        debug!(
            regions = regions.len(),
            threads = image.threads().len(),
            architecture = %image.architecture(),
            "core dump session ready"
        );

        Self {
            path: None,
            image: Box::new(image),
            by_start,
        }
    }

    /// Path the session was opened from, if it came from disk.
    pub fn path(&self) -> Option<&Path>
    {
        self.path.as_deref()
    }

    pub fn architecture(&self) -> Architecture
    {
        self.image.architecture()
    }

    /// All memory regions, in dump order.
    pub fn regions(&self) -> &[MemoryRegion]
    {
        self.image.regions()
    }

    /// All thread snapshots, in dump order.
    pub fn threads(&self) -> &[ThreadSnapshot]
    {
        self.image.threads()
    }

    /// The region whose `[start, end)` contains `address`.
    ///
    /// An address in an unmapped gap is normal (the pc of a wild jump, a
    /// garbage return address) and yields `None`.
    pub fn region_containing(&self, address: Address) -> Option<&MemoryRegion>
    {
        let regions = self.image.regions();
        let upper = self.by_start.partition_point(|&index| regions[index].start <= address);
        let candidate = &regions[self.by_start[upper.checked_sub(1)?]];
        candidate.contains(address).then_some(candidate)
    }

    /// Read one pointer-sized word at `address`.
    ///
    /// Returns `None` if the word is unmapped, not captured, or straddles
    /// the end of a region.
    pub fn read_word(&self, address: Address) -> Option<u64>
    {
        let size = self.architecture().word_size();
        let bytes = self.image.read_memory(address, size)?;
        self.image.byte_order().read_uint(bytes)
    }
}

impl fmt::Debug for CoreDumpSession
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("CoreDumpSession")
            .field("path", &self.path)
            .field("architecture", &self.architecture())
            .field("regions", &self.regions().len())
            .field("threads", &self.threads().len())
            .finish()
    }
}

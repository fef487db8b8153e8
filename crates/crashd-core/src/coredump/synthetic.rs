//! In-memory core images.

use super::CoreImage;
use crate::types::{Address, Architecture, ByteOrder, MemoryRegion, RegionId, ThreadSnapshot};

/// Core image assembled in memory.
///
/// Used to replay a crash without an on-disk dump: regions get zero-filled
/// captured memory, and words can be planted to build frame chains.
///
/// ```rust
/// use crashd_core::coredump::{CoreImage, SyntheticCore};
/// use crashd_core::types::{Address, Architecture};
///
/// let image = SyntheticCore::new(Architecture::X86)
///     .with_region("libfoo.so:100-200", 0x100, 0x200)
///     .with_thread(1, 0x150, 0x0);
/// assert_eq!(image.regions().len(), 1);
/// assert_eq!(image.threads()[0].registers.pc, Address::from(0x150));
/// ```
#[derive(Debug, Clone)]
pub struct SyntheticCore
{
    architecture: Architecture,
    byte_order: ByteOrder,
    regions: Vec<MemoryRegion>,
    /// Captured bytes per region, parallel to `regions`.
    memory: Vec<Vec<u8>>,
    threads: Vec<ThreadSnapshot>,
}

impl SyntheticCore
{
    /// Empty little-endian image.
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            byte_order: ByteOrder::Little,
            regions: Vec::new(),
            memory: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Switch the byte order used by `with_word` and reads.
    #[must_use]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self
    {
        self.byte_order = byte_order;
        self
    }

    /// Add a region whose memory is fully captured (zero-filled).
    #[must_use]
    pub fn with_region(self, name: impl Into<String>, start: u64, end: u64) -> Self
    {
        let captured = usize::try_from(end.saturating_sub(start)).unwrap_or(0);
        self.push_region(name.into(), start, end, captured)
    }

    /// Add a region that is mapped but whose memory was not captured.
    ///
    /// This is how read-only file mappings usually appear in ELF cores.
    #[must_use]
    pub fn with_mapped_region(self, name: impl Into<String>, start: u64, end: u64) -> Self
    {
        self.push_region(name.into(), start, end, 0)
    }

    fn push_region(mut self, name: String, start: u64, end: u64, captured: usize) -> Self
    {
        let id = RegionId(self.regions.len());
        self.regions
            .push(MemoryRegion::new(id, name, Address::from(start), Address::from(end)));
        self.memory.push(vec![0; captured]);
        self
    }

    /// Add a thread with the given pc and frame pointer.
    #[must_use]
    pub fn with_thread(mut self, tid: u64, pc: u64, fp: u64) -> Self
    {
        self.threads
            .push(ThreadSnapshot::new(tid, Address::from(pc), Address::from(fp)));
        self
    }

    /// Store a pointer-sized word at `address`.
    ///
    /// Writes that do not fit entirely inside captured memory are dropped,
    /// the same way such a word would be missing from a real dump.
    #[must_use]
    pub fn with_word(mut self, address: u64, value: u64) -> Self
    {
        let size = self.architecture.word_size();
        let bytes = match (self.byte_order, size) {
            (ByteOrder::Little, 4) => (value as u32).to_le_bytes().to_vec(),
            (ByteOrder::Big, 4) => (value as u32).to_be_bytes().to_vec(),
            (ByteOrder::Little, _) => value.to_le_bytes().to_vec(),
            (ByteOrder::Big, _) => value.to_be_bytes().to_vec(),
        };

        if let Some(slot) = self.captured_range_mut(Address::from(address), size) {
            slot.copy_from_slice(&bytes);
        }
        self
    }

    fn locate(&self, address: Address, len: usize) -> Option<(usize, usize)>
    {
        let index = self.regions.iter().position(|region| region.contains(address))?;
        let offset = usize::try_from(address.offset_from(self.regions[index].start)?).ok()?;
        let end = offset.checked_add(len)?;
        (end <= self.memory[index].len()).then_some((index, offset))
    }

    fn captured_range_mut(&mut self, address: Address, len: usize) -> Option<&mut [u8]>
    {
        let (index, offset) = self.locate(address, len)?;
        self.memory[index].get_mut(offset..offset + len)
    }
}

impl CoreImage for SyntheticCore
{
    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn byte_order(&self) -> ByteOrder
    {
        self.byte_order
    }

    fn regions(&self) -> &[MemoryRegion]
    {
        &self.regions
    }

    fn threads(&self) -> &[ThreadSnapshot]
    {
        &self.threads
    }

    fn read_memory(&self, address: Address, len: usize) -> Option<&[u8]>
    {
        let (index, offset) = self.locate(address, len)?;
        self.memory[index].get(offset..offset + len)
    }
}

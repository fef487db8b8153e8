//! Memory region types.

use std::fmt;

use super::Address;

/// Separator between the backing object's name and the rest of a region name
///
/// Region names look like `libc.so: .text` or `/usr/bin/app:400000-401000`.
/// A name without this separator belongs to an anonymous mapping.
pub const REGION_NAME_DELIMITER: char = ':';

/// Identifier for memory regions
///
/// Regions are numbered in the order the core dump lists them (0, 1, 2, ...).
/// The identifier is stable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub usize);

impl RegionId
{
    /// Get the raw `usize` value of this region identifier
    pub fn value(self) -> usize
    {
        self.0
    }
}

/// Memory region captured in a core dump
///
/// Represents one mapped range of the crashed process. The name encodes the
/// backing object (see [`REGION_NAME_DELIMITER`]); anonymous mappings carry a
/// name without a delimiter.
///
/// ## Examples
///
/// ```
/// use crashd_core::types::{Address, MemoryRegion, RegionId};
///
/// let text = MemoryRegion::new(
///     RegionId(0),
///     "libfoo.so:100-200",
///     Address::from(0x100),
///     Address::from(0x200),
/// );
/// assert_eq!(text.size(), 0x100);
/// assert!(text.contains(Address::from(0x1ff)));
/// assert!(!text.contains(Address::from(0x200)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion
{
    /// Stable identifier for the region.
    pub id: RegionId,
    /// Region name as recorded in the dump
    pub name: String,
    /// Start address of the region (inclusive)
    pub start: Address,
    /// End address of the region (exclusive)
    pub end: Address,
}

impl MemoryRegion
{
    /// Create a new memory region
    ///
    /// This function does not validate that `end > start`. If `end <= start`,
    /// `size()` will return 0 and `contains()` is always false.
    pub fn new(id: RegionId, name: impl Into<String>, start: Address, end: Address) -> Self
    {
        Self {
            id,
            name: name.into(),
            start,
            end,
        }
    }

    /// Get the size of the memory region in bytes
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    /// Whether `address` falls inside `[start, end)`
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }

    /// Whether the region name carries no object name
    pub fn is_anonymous(&self) -> bool
    {
        !self.name.contains(REGION_NAME_DELIMITER)
    }
}

impl fmt::Display for MemoryRegion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}-{} {}", self.start, self.end, self.name)
    }
}

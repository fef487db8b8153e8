//! Addresses inside the crashed process.

use std::fmt;

/// A virtual address in the crashed process's address space
///
/// Kept distinct from plain `u64` so region bounds, register values and
/// object offsets cannot be swapped by accident. Addresses from 32-bit dumps
/// are zero-extended.
///
/// Everything the walker follows comes out of the dump and may be garbage;
/// arithmetic is checked only.
///
/// ## Example
///
/// ```rust
/// use crashd_core::types::Address;
///
/// let fp = Address::from(0x250);
/// assert_eq!(fp.checked_add(4), Some(Address::from(0x254)));
/// assert_eq!(fp.to_string(), "0x250");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// Address zero; as a pc it terminates a frame chain
    pub const ZERO: Self = Address(0);

    pub const fn new(raw: u64) -> Self
    {
        Address(raw)
    }

    /// The raw numeric value
    pub const fn value(self) -> u64
    {
        self.0
    }

    pub const fn is_zero(self) -> bool
    {
        self.0 == 0
    }

    /// `self + delta`, or `None` past the top of the address space
    ///
    /// ```rust
    /// use crashd_core::types::Address;
    ///
    /// assert_eq!(Address::new(u64::MAX - 3).checked_add(8), None);
    /// ```
    pub fn checked_add(self, delta: u64) -> Option<Self>
    {
        self.0.checked_add(delta).map(Address)
    }

    /// `self - delta`, or `None` below zero
    pub fn checked_sub(self, delta: u64) -> Option<Self>
    {
        self.0.checked_sub(delta).map(Address)
    }

    /// Byte distance from `base` up to `self`; `None` when `base` is higher
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(raw: u64) -> Self
    {
        Self::new(raw)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> u64
    {
        address.value()
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

//! Thread, register, and architecture types.

use std::fmt;

use super::Address;

/// Thread identifier recorded in the dump (the kernel TID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// CPU architecture of the crashed process
///
/// Only the properties the frame-pointer walk needs are modelled here: the
/// width of a saved word and a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 32-bit x86 (i386)
    X86,
    /// 64-bit x86
    X86_64,
    /// 64-bit ARM (AArch64)
    Arm64,
}

impl Architecture
{
    /// Size of a pointer / saved register word in bytes
    pub const fn word_size(self) -> usize
    {
        match self {
            Architecture::X86 => 4,
            Architecture::X86_64 | Architecture::Arm64 => 8,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        };
        write!(f, "{label}")
    }
}

/// Byte order of words stored in a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder
{
    Little,
    Big,
}

impl ByteOrder
{
    /// Decode an unsigned word of 1, 2, 4, or 8 bytes.
    ///
    /// Returns `None` for any other width.
    pub fn read_uint(self, bytes: &[u8]) -> Option<u64>
    {
        match bytes.len() {
            1 => Some(u64::from(bytes[0])),
            2 => {
                let raw: [u8; 2] = bytes.try_into().ok()?;
                Some(u64::from(match self {
                    ByteOrder::Little => u16::from_le_bytes(raw),
                    ByteOrder::Big => u16::from_be_bytes(raw),
                }))
            }
            4 => {
                let raw: [u8; 4] = bytes.try_into().ok()?;
                Some(u64::from(match self {
                    ByteOrder::Little => u32::from_le_bytes(raw),
                    ByteOrder::Big => u32::from_be_bytes(raw),
                }))
            }
            8 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                Some(match self {
                    ByteOrder::Little => u64::from_le_bytes(raw),
                    ByteOrder::Big => u64::from_be_bytes(raw),
                })
            }
            _ => None,
        }
    }
}

/// Register snapshot of one thread at crash time
///
/// `pc`, `sp`, and `fp` are pulled out of the architecture-specific layout
/// because the walker needs them by role. `general` keeps every raw register
/// word in the order the dump stored them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers
{
    /// Program counter (EIP / RIP / PC)
    pub pc: Address,
    /// Stack pointer (ESP / RSP / SP)
    pub sp: Address,
    /// Frame pointer (EBP / RBP / X29)
    pub fp: Address,
    /// Raw register file as stored in the dump
    pub general: Vec<u64>,
}

/// One thread present in the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot
{
    /// Kernel thread id
    pub tid: ThreadId,
    /// Registers at crash time
    pub registers: Registers,
}

impl ThreadSnapshot
{
    /// Snapshot with only the walker-relevant registers filled in
    pub fn new(tid: impl Into<ThreadId>, pc: Address, fp: Address) -> Self
    {
        Self {
            tid: tid.into(),
            registers: Registers {
                pc,
                fp,
                ..Registers::default()
            },
        }
    }
}

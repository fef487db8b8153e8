//! Backtrace frame type.

use std::fmt;

use super::symbols::{SourceLocation, SymbolName};
use super::{Address, RegionId};

/// Placeholder printed for anything we could not resolve.
pub const UNKNOWN: &str = "???";

/// One resolved frame of a thread backtrace.
///
/// Every field past `pc` is best-effort: an unmapped pc has no region, an
/// anonymous region has no object, a stripped object has no location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame
{
    /// Instruction pointer of the frame.
    pub pc: Address,
    /// Region containing `pc`, if any.
    pub region: Option<RegionId>,
    /// Short name of the backing object (`libc.so`, `/usr/bin/app`).
    pub object_name: Option<String>,
    /// Enclosing function.
    pub symbol: Option<SymbolName>,
    /// Source file and line.
    pub location: Option<SourceLocation>,
}

impl BacktraceFrame
{
    /// Frame for an address outside every region (or in an anonymous one).
    pub fn unknown(pc: Address, region: Option<RegionId>) -> Self
    {
        Self {
            pc,
            region,
            object_name: None,
            symbol: None,
            location: None,
        }
    }

    /// Whether anything beyond the raw address was resolved.
    pub fn is_symbolicated(&self) -> bool
    {
        self.symbol.is_some()
    }
}

/// Renders `<pc>: [<object>] <symbol> (<file>:<line>)`.
impl fmt::Display for BacktraceFrame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let Some(object) = &self.object_name else {
            return write!(f, "{}: {UNKNOWN}", self.pc);
        };

        write!(f, "{}: [{object}] ", self.pc)?;
        match &self.symbol {
            Some(symbol) => write!(f, "{symbol}")?,
            None => write!(f, "{UNKNOWN}")?,
        }
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

//! # Types
//!
//! Plain data shared by the session, the resolver, and the walker.
//!
//! Nothing in here touches the filesystem; these are the values a core dump
//! decodes into and a backtrace is rendered from.

pub mod address;
pub mod frame;
pub mod region;
pub mod symbols;
pub mod thread;

// Re-export all public types
pub use address::Address;
pub use frame::{BacktraceFrame, UNKNOWN};
pub use region::{MemoryRegion, RegionId, REGION_NAME_DELIMITER};
pub use symbols::{SourceLocation, SymbolLanguage, SymbolName};
pub use thread::{Architecture, ByteOrder, Registers, ThreadId, ThreadSnapshot};

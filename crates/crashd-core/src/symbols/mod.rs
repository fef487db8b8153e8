//! # Symbols
//!
//! Everything between "this pc is in region R" and "this pc is `foo` at
//! `foo.c:12`":
//!
//! - [`ObjectResolver`]: region name to object path, plus the object cache
//! - [`LoadedObject`]: a mapped executable or library with its symbol table
//! - [`DebugInfo`]: symbol and source-line lookups by offset into an object

mod demangle;
mod object;
mod resolver;

pub use self::object::{DebugInfo, LoadedObject, TextSymbol};
pub use resolver::{
    object_name_for_region, CacheStats, ObjectResolver, DEFAULT_LIBRARY_DIR, DEFAULT_LOADER_MARKER,
};

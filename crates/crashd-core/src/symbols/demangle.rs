//! Symbol demangling.
//!
//! Symbol tables in crashed binaries hold linkage names. Rust names (legacy
//! `_ZN...` and v0 `_R...`) go through `rustc_demangle` first; Itanium C++
//! names that it rejects go through `cpp_demangle`. Anything neither accepts
//! is printed as stored.

use cpp_demangle::DemangleOptions;
use rustc_demangle::try_demangle;

use crate::types::{SymbolLanguage, SymbolName};

/// Build a [`SymbolName`] from a raw linkage name.
///
/// The language is whichever demangler accepted the name:
///
/// - `rustc_demangle`: Rust
/// - `cpp_demangle`: C++ (Itanium)
/// - neither: unknown (usually C)
///
/// Legacy Rust names are Itanium-shaped, so Rust is tried first. A `_ZN`
/// name with a parameter list after the final `E` is not a Rust name and
/// falls through to the C++ demangler.
pub(crate) fn make_symbol_name(raw: impl Into<String>) -> SymbolName
{
    let raw = raw.into();

    if let Ok(name) = try_demangle(&raw) {
        let demangled = format!("{name:#}");
        return SymbolName::new(raw, Some(demangled), SymbolLanguage::Rust);
    }
    if let Some(demangled) = demangle_cpp(&raw) {
        return SymbolName::new(raw, Some(demangled), SymbolLanguage::Cpp);
    }
    SymbolName::new(raw, None, SymbolLanguage::Unknown)
}

fn demangle_cpp(raw: &str) -> Option<String>
{
    if !raw.starts_with("_Z") {
        return None;
    }
    let symbol = cpp_demangle::Symbol::new(raw).ok()?;
    symbol.demangle(&DemangleOptions::default()).ok()
}

//! Function names and source positions attached to frames.

use std::fmt;
use std::path::Path;

/// Mangling scheme a linkage name was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// Accepted by `rustc_demangle` (`_R` v0, or legacy `_ZN...E`)
    Rust,
    /// Itanium `_Z` names accepted by `cpp_demangle`
    Cpp,
    /// Plain C or anything unrecognised
    Unknown,
}

/// A symbol from an object's tables or debug info.
///
/// The raw linkage name is always kept; backtraces print the demangled form
/// when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    pub fn new(raw: String, demangled: Option<String>, language: SymbolLanguage) -> Self
    {
        Self {
            raw,
            demangled,
            language,
        }
    }

    /// Name exactly as stored in the object file.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// What a backtrace line shows for this symbol.
    pub fn display_name(&self) -> &str
    {
        match &self.demangled {
            Some(name) => name,
            None => &self.raw,
        }
    }

    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.display_name())
    }
}

/// File and line from an object's DWARF line table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    /// Full path as the compiler recorded it
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SourceLocation
{
    pub fn new(file: impl Into<String>, line: u32) -> Self
    {
        Self {
            file: file.into(),
            line: Some(line),
            column: None,
        }
    }

    /// Last component of `file`. Backtrace lines only show this part.
    pub fn basename(&self) -> &str
    {
        match Path::new(&self.file).file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => &self.file,
        }
    }
}

/// `abort.c:37`, or just `abort.c` without a line.
impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.basename())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        Ok(())
    }
}

//! Loaded binary objects and their debug information.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use memmap2::Mmap;
use object::{Object, ObjectKind, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use once_cell::unsync::OnceCell;
use tracing::{debug, trace};

use super::demangle::make_symbol_name;
use crate::error::{CrashError, Result};
use crate::types::{SourceLocation, SymbolName};

type OwnedReader = EndianArcSlice<RunTimeEndian>;

const DWARF_SECTIONS: &[&str] = &[
    ".debug_abbrev",
    ".debug_addr",
    ".debug_aranges",
    ".debug_info",
    ".debug_line",
    ".debug_line_str",
    ".debug_ranges",
    ".debug_rnglists",
    ".debug_str",
    ".debug_str_offsets",
];

/// A function symbol from `.symtab` or `.dynsym`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSymbol
{
    /// Link-time virtual address
    pub address: u64,
    /// Size in bytes; `0` when the table did not record one
    pub size: u64,
    /// Raw linkage name
    pub name: String,
}

impl TextSymbol
{
    fn covers(&self, address: u64) -> bool
    {
        self.size == 0 || address - self.address < self.size
    }
}

/// A binary object (executable or shared library) parsed for symbolication.
///
/// Objects are loaded at most once per path and shared through `Arc` by every
/// frame that resolves into them. All lookups take an offset from the
/// object's load base, not a runtime address.
pub struct LoadedObject
{
    path: PathBuf,
    image: Mmap,
    mtime: Option<SystemTime>,
    relocatable: bool,
    image_base: u64,
    endian: RunTimeEndian,
    /// Sorted by address, one entry per address.
    symbols: Vec<TextSymbol>,
    debug_sections: HashMap<&'static str, Arc<[u8]>>,
    context: OnceCell<Option<Context<OwnedReader>>>,
}

impl LoadedObject
{
    /// Map the object at `path` read-only and index its symbols.
    ///
    /// DWARF is copied out of the mapping here, but the addr2line context is
    /// only built on the first source lookup.
    ///
    /// ## Errors
    ///
    /// [`CrashError::ObjectLoad`] if the file cannot be opened, mapped, or
    /// parsed as an object file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let fail = |reason: String| CrashError::ObjectLoad {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|err| fail(err.to_string()))?;
        let mtime = file.metadata().and_then(|meta| meta.modified()).ok();
        // SAFETY: read-only private mapping. Objects being replaced on disk
        // are picked up by `ObjectResolver::evict_stale`.
        let image = unsafe { Mmap::map(&file) }.map_err(|err| fail(err.to_string()))?;

        let parsed = object::File::parse(&image[..]).map_err(|err| fail(err.to_string()))?;
        let endian = if parsed.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let relocatable = matches!(parsed.kind(), ObjectKind::Dynamic | ObjectKind::Relocatable);
        let image_base = parsed
            .segments()
            .filter(|segment| segment.size() > 0)
            .map(|segment| segment.address())
            .min()
            .unwrap_or(0);
        let symbols = collect_text_symbols(&parsed);

        let mut debug_sections = HashMap::new();
        for &name in DWARF_SECTIONS {
            let Some(section) = parsed.section_by_name(name) else {
                continue;
            };
            let data = section
                .uncompressed_data()
                .map_err(|err| fail(format!("failed to read {name}: {err}")))?;
            let data: Arc<[u8]> = match data {
                Cow::Borrowed(bytes) => Arc::from(bytes),
                Cow::Owned(vec) => vec.into(),
            };
            debug_sections.insert(name, data);
        }

        debug!(
            path = %path.display(),
            symbols = symbols.len(),
            relocatable,
            image_base = format_args!("{image_base:#x}"),
            has_dwarf = debug_sections.contains_key(".debug_info"),
            "loaded object"
        );

        Ok(Self {
            path: path.to_path_buf(),
            image,
            mtime,
            relocatable,
            image_base,
            endian,
            symbols,
            debug_sections,
            context: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Modification time recorded when the object was loaded.
    pub fn mtime(&self) -> Option<SystemTime>
    {
        self.mtime
    }

    /// Size of the mapped file in bytes.
    pub fn image_len(&self) -> usize
    {
        self.image.len()
    }

    /// Whether the object is position independent (shared library, PIE).
    pub fn is_relocatable(&self) -> bool
    {
        self.relocatable
    }

    /// Lowest virtual address of any loadable segment.
    pub fn image_base(&self) -> u64
    {
        self.image_base
    }

    /// Function symbols, sorted by address.
    pub fn symbols(&self) -> &[TextSymbol]
    {
        &self.symbols
    }

    /// Offset of `pc` into this object, given where its first region starts.
    ///
    /// Position-dependent executables run at their link addresses, so for
    /// them the offset is taken from the image base instead of `load_base`.
    pub fn offset_of(&self, pc: u64, load_base: u64) -> Option<u64>
    {
        if self.relocatable {
            pc.checked_sub(load_base)
        } else {
            pc.checked_sub(self.image_base)
        }
    }

    /// Lookup facade over the symbol table and DWARF.
    pub fn debug_info(&self) -> DebugInfo<'_>
    {
        DebugInfo { object: self }
    }

    fn virtual_address(&self, offset: u64) -> Option<u64>
    {
        self.image_base.checked_add(offset)
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .debug_sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    fn context(&self) -> Option<&Context<OwnedReader>>
    {
        self.context
            .get_or_init(|| {
                if !self.debug_sections.contains_key(".debug_info") {
                    return None;
                }
                let dwarf = Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section)));
                match dwarf.and_then(Context::from_dwarf) {
                    Ok(context) => Some(context),
                    Err(err) => {
                        debug!(path = %self.path.display(), error = %err, "unusable DWARF");
                        None
                    }
                }
            })
            .as_ref()
    }

    fn table_symbol_at(&self, address: u64) -> Option<&TextSymbol>
    {
        let upper = self.symbols.partition_point(|symbol| symbol.address <= address);
        let candidate = &self.symbols[upper.checked_sub(1)?];
        candidate.covers(address).then_some(candidate)
    }
}

impl std::fmt::Debug for LoadedObject
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("LoadedObject")
            .field("path", &self.path)
            .field("relocatable", &self.relocatable)
            .field("image_base", &format_args!("{:#x}", self.image_base))
            .field("symbols", &self.symbols.len())
            .finish_non_exhaustive()
    }
}

/// Symbol and line lookups for one [`LoadedObject`].
///
/// Lookups never fail loudly: anything missing (stripped object, address
/// past the last symbol, broken DWARF) comes back as `None`.
#[derive(Clone, Copy)]
pub struct DebugInfo<'a>
{
    object: &'a LoadedObject,
}

impl DebugInfo<'_>
{
    /// Name of the function containing `offset`.
    ///
    /// The symbol tables are consulted first. If no table symbol covers the
    /// address, the outermost DWARF subprogram is used.
    pub fn symbol_at(&self, offset: u64) -> Option<SymbolName>
    {
        let address = self.object.virtual_address(offset)?;
        if let Some(symbol) = self.object.table_symbol_at(address) {
            return Some(make_symbol_name(symbol.name.as_str()));
        }

        let context = self.object.context()?;
        let mut frames = context.find_frames(address).skip_all_loads().ok()?;
        let mut outermost = None;
        while let Ok(Some(frame)) = frames.next() {
            if let Some(name) = frame.function.as_ref().and_then(|function| function.raw_name().ok()) {
                outermost = Some(name.into_owned());
            }
        }
        trace!(address = format_args!("{address:#x}"), found = outermost.is_some(), "DWARF symbol fallback");
        outermost.map(make_symbol_name)
    }

    /// Source file and line for `offset`, if the object carries line tables.
    pub fn source_position_at(&self, offset: u64) -> Option<SourceLocation>
    {
        let address = self.object.virtual_address(offset)?;
        let location = self.object.context()?.find_location(address).ok()??;
        Some(SourceLocation {
            file: location.file?.to_string(),
            line: location.line,
            column: location.column,
        })
    }
}

fn collect_text_symbols(file: &object::File<'_>) -> Vec<TextSymbol>
{
    let mut symbols: Vec<TextSymbol> = file
        .symbols()
        .chain(file.dynamic_symbols())
        .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition() && symbol.address() != 0)
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            (!name.is_empty()).then(|| TextSymbol {
                address: symbol.address(),
                size: symbol.size(),
                name: name.to_string(),
            })
        })
        .collect();

    // Prefer the sized entry when .symtab and .dynsym both list an address.
    symbols.sort_by(|a, b| a.address.cmp(&b.address).then(b.size.cmp(&a.size)));
    symbols.dedup_by_key(|symbol| symbol.address);
    symbols
}

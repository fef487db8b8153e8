//! ELF core file reader.
//!
//! Layout knowledge is limited to what a frame-pointer backtrace needs:
//!
//! - `PT_LOAD` segments become memory regions. Only `p_filesz` bytes are
//!   captured; the rest of `p_memsz` is mapped but unreadable.
//! - The `NT_FILE` note names regions after the file they map.
//! - Each `NT_PRSTATUS` note is one thread (pid + general registers).

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use object::elf;
use object::read::elf::{ElfFile, FileHeader, ProgramHeader};
use object::{Endian, Endianness, FileKind};
use tracing::{debug, warn};

use super::CoreImage;
use crate::error::{CrashError, Result};
use crate::types::{Address, Architecture, ByteOrder, MemoryRegion, RegionId, Registers, ThreadId, ThreadSnapshot};

const NT_PRSTATUS: u32 = 1;
const NT_FILE: u32 = 0x4649_4c45;
const CORE_NOTE_NAME: &[u8] = b"CORE";

/// Name given to regions no `NT_FILE` entry covers.
const ANONYMOUS_REGION: &str = "[anonymous]";

/// Where the interesting fields sit inside `struct elf_prstatus`.
struct PrstatusLayout
{
    pid_offset: usize,
    regs_offset: usize,
    reg_count: usize,
    pc_index: usize,
    sp_index: usize,
    fp_index: usize,
}

impl PrstatusLayout
{
    const fn for_architecture(architecture: Architecture) -> Self
    {
        match architecture {
            // ebx ecx edx esi edi ebp eax ds es fs gs orig_eax eip cs eflags esp ss
            Architecture::X86 => Self {
                pid_offset: 24,
                regs_offset: 72,
                reg_count: 17,
                pc_index: 12,
                sp_index: 15,
                fp_index: 5,
            },
            // r15 r14 r13 r12 rbp rbx r11 r10 r9 r8 rax rcx rdx rsi rdi orig_rax rip cs
            // eflags rsp ss fs_base gs_base ds es fs gs
            Architecture::X86_64 => Self {
                pid_offset: 32,
                regs_offset: 112,
                reg_count: 27,
                pc_index: 16,
                sp_index: 19,
                fp_index: 4,
            },
            // x0..x30 sp pc pstate
            Architecture::Arm64 => Self {
                pid_offset: 32,
                regs_offset: 112,
                reg_count: 34,
                pc_index: 32,
                sp_index: 31,
                fp_index: 29,
            },
        }
    }
}

/// A `PT_LOAD` segment and where its captured bytes live in the file.
#[derive(Debug, Clone, Copy)]
struct LoadSegment
{
    start: u64,
    end: u64,
    file_offset: usize,
    captured: usize,
}

/// One `NT_FILE` entry.
#[derive(Debug, Clone)]
struct FileMapping
{
    start: u64,
    end: u64,
    path: String,
}

/// Everything decoded from the headers, before it is paired with the mapping.
struct CoreLayout
{
    architecture: Architecture,
    byte_order: ByteOrder,
    segments: Vec<LoadSegment>,
    files: Vec<FileMapping>,
    threads: Vec<ThreadSnapshot>,
}

/// Core dump backed by a read-only memory map of an ELF `ET_CORE` file.
pub struct ElfCoreImage
{
    map: Mmap,
    architecture: Architecture,
    byte_order: ByteOrder,
    regions: Vec<MemoryRegion>,
    /// Parallel to `regions`.
    segments: Vec<LoadSegment>,
    threads: Vec<ThreadSnapshot>,
}

impl ElfCoreImage
{
    /// Map and parse the core file at `path`.
    ///
    /// ## Errors
    ///
    /// - [`CrashError::CorruptDump`] if the file cannot be opened or mapped,
    ///   is not a 32/64-bit ELF core, or has malformed notes
    /// - [`CrashError::UnsupportedArchitecture`] for machines other than
    ///   x86, x86-64 and AArch64
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| CrashError::corrupt(path, format!("cannot open: {err}")))?;
        // SAFETY: the map is read-only and private to this image. The daemon
        // only opens dumps after the producer marked them complete.
        let map = unsafe { Mmap::map(&file) }.map_err(|err| CrashError::corrupt(path, format!("cannot map: {err}")))?;

        let layout = match FileKind::parse(&map[..]) {
            Ok(FileKind::Elf32) => parse_layout::<elf::FileHeader32<Endianness>>(path, &map)?,
            Ok(FileKind::Elf64) => parse_layout::<elf::FileHeader64<Endianness>>(path, &map)?,
            Ok(other) => return Err(CrashError::corrupt(path, format!("not an ELF file ({other:?})"))),
            Err(err) => return Err(CrashError::corrupt(path, err.to_string())),
        };

        let regions = layout
            .segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                MemoryRegion::new(
                    RegionId(index),
                    region_name(segment, &layout.files),
                    Address::from(segment.start),
                    Address::from(segment.end),
                )
            })
            .collect();

        debug!(
            path = %path.display(),
            segments = layout.segments.len(),
            mapped_files = layout.files.len(),
            threads = layout.threads.len(),
            "parsed ELF core"
        );

        Ok(Self {
            map,
            architecture: layout.architecture,
            byte_order: layout.byte_order,
            regions,
            segments: layout.segments,
            threads: layout.threads,
        })
    }
}

impl CoreImage for ElfCoreImage
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
        let value = address.value();
        let segment = self
            .segments
            .iter()
            .find(|segment| value >= segment.start && value < segment.end)?;

        let offset = usize::try_from(value - segment.start).ok()?;
        if offset.checked_add(len)? > segment.captured {
            return None;
        }
        let begin = segment.file_offset.checked_add(offset)?;
        self.map.get(begin..begin.checked_add(len)?)
    }
}

fn parse_layout<Elf: FileHeader<Endian = Endianness>>(path: &Path, data: &[u8]) -> Result<CoreLayout>
{
    let file = ElfFile::<Elf, &[u8]>::parse(data).map_err(|err| CrashError::corrupt(path, err.to_string()))?;
    let endian = file.endian();
    let header = file.elf_header();

    let e_type = header.e_type(endian);
    if e_type != elf::ET_CORE {
        return Err(CrashError::corrupt(path, format!("not a core file (e_type {e_type})")));
    }

    let architecture = match header.e_machine(endian) {
        elf::EM_386 => Architecture::X86,
        elf::EM_X86_64 => Architecture::X86_64,
        elf::EM_AARCH64 => Architecture::Arm64,
        other => return Err(CrashError::UnsupportedArchitecture(other)),
    };
    let byte_order = if endian.is_little_endian() {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    };
    let class_word = if header.is_type_64() { 8 } else { 4 };

    let mut segments = Vec::new();
    let mut files = Vec::new();
    let mut threads = Vec::new();

    for phdr in file.elf_program_headers() {
        match phdr.p_type(endian) {
            elf::PT_LOAD => {
                let start: u64 = phdr.p_vaddr(endian).into();
                let mem_size: u64 = phdr.p_memsz(endian).into();
                let file_offset: u64 = phdr.p_offset(endian).into();
                let file_size: u64 = phdr.p_filesz(endian).into();

                let Some(end) = start.checked_add(mem_size) else {
                    warn!(path = %path.display(), start, mem_size, "skipping PT_LOAD that wraps the address space");
                    continue;
                };
                let file_offset = usize::try_from(file_offset).unwrap_or(usize::MAX);
                let available = data.len().saturating_sub(file_offset);
                let wanted = usize::try_from(file_size.min(mem_size)).unwrap_or(usize::MAX);
                if wanted > available {
                    warn!(
                        path = %path.display(),
                        start = format_args!("{start:#x}"),
                        wanted,
                        available,
                        "core dump is truncated; segment only partially captured"
                    );
                }

                segments.push(LoadSegment {
                    start,
                    end,
                    file_offset,
                    captured: wanted.min(available),
                });
            }
            elf::PT_NOTE => {
                let Some(mut notes) = phdr
                    .notes(endian, data)
                    .map_err(|err| CrashError::corrupt(path, format!("bad PT_NOTE: {err}")))?
                else {
                    continue;
                };

                while let Some(note) = notes
                    .next()
                    .map_err(|err| CrashError::corrupt(path, format!("bad note: {err}")))?
                {
                    if trim_nul(note.name()) != CORE_NOTE_NAME {
                        continue;
                    }
                    match note.n_type(endian) {
                        NT_PRSTATUS => {
                            let thread = parse_prstatus(architecture, byte_order, note.desc())
                                .ok_or_else(|| CrashError::corrupt(path, "truncated NT_PRSTATUS note"))?;
                            threads.push(thread);
                        }
                        NT_FILE => match parse_file_note(class_word, byte_order, note.desc()) {
                            Some(entries) => files = entries,
                            None => warn!(path = %path.display(), "ignoring malformed NT_FILE note"),
                        },
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(CoreLayout {
        architecture,
        byte_order,
        segments,
        files,
        threads,
    })
}

fn region_name(segment: &LoadSegment, files: &[FileMapping]) -> String
{
    files
        .iter()
        .find(|mapping| segment.start >= mapping.start && segment.start < mapping.end)
        .map_or_else(
            || ANONYMOUS_REGION.to_string(),
            |mapping| format!("{}:{:x}-{:x}", mapping.path, segment.start, segment.end),
        )
}

fn trim_nul(name: &[u8]) -> &[u8]
{
    let len = name.iter().rposition(|&byte| byte != 0).map_or(0, |last| last + 1);
    &name[..len]
}

fn read_uint(order: ByteOrder, bytes: &[u8], offset: usize, width: usize) -> Option<u64>
{
    order.read_uint(bytes.get(offset..offset.checked_add(width)?)?)
}

fn parse_prstatus(architecture: Architecture, order: ByteOrder, desc: &[u8]) -> Option<ThreadSnapshot>
{
    let layout = PrstatusLayout::for_architecture(architecture);
    let word = architecture.word_size();

    let tid = read_uint(order, desc, layout.pid_offset, 4)?;
    let general = (0..layout.reg_count)
        .map(|index| read_uint(order, desc, layout.regs_offset + index * word, word))
        .collect::<Option<Vec<u64>>>()?;

    Some(ThreadSnapshot {
        tid: ThreadId(tid),
        registers: Registers {
            pc: Address::from(general[layout.pc_index]),
            sp: Address::from(general[layout.sp_index]),
            fp: Address::from(general[layout.fp_index]),
            general,
        },
    })
}

/// `count, page_size, count * (start, end, file_ofs), count * "path\0"`
fn parse_file_note(word: usize, order: ByteOrder, desc: &[u8]) -> Option<Vec<FileMapping>>
{
    let count = usize::try_from(read_uint(order, desc, 0, word)?).ok()?;
    let table = 2 * word;
    let names_offset = count.checked_mul(3 * word)?.checked_add(table)?;
    let mut names = desc.get(names_offset..)?.split(|&byte| byte == 0);

    let mut mappings = Vec::with_capacity(count.min(4096));
    for index in 0..count {
        let entry = table + index * 3 * word;
        let start = read_uint(order, desc, entry, word)?;
        let end = read_uint(order, desc, entry + word, word)?;
        let path = String::from_utf8_lossy(names.next()?).into_owned();
        mappings.push(FileMapping { start, end, path });
    }
    Some(mappings)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_trim_nul()
    {
        assert_eq!(trim_nul(b"CORE\0\0\0"), b"CORE");
        assert_eq!(trim_nul(b"CORE"), b"CORE");
        assert_eq!(trim_nul(b"\0\0"), b"");
    }

    #[test]
    fn test_parse_file_note()
    {
        let mut desc = Vec::new();
        for value in [2u64, 0x1000, 0x400000, 0x401000, 0, 0x7f0000, 0x7f2000, 1] {
            desc.extend_from_slice(&value.to_le_bytes());
        }
        desc.extend_from_slice(b"/usr/bin/app\0/usr/lib/libc.so.6\0");

        let mappings = parse_file_note(8, ByteOrder::Little, &desc).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].path, "/usr/bin/app");
        assert_eq!(mappings[1].start, 0x7f0000);
        assert_eq!(mappings[1].end, 0x7f2000);
        assert_eq!(mappings[1].path, "/usr/lib/libc.so.6");
    }

    #[test]
    fn test_parse_file_note_rejects_absurd_count()
    {
        let mut desc = Vec::new();
        desc.extend_from_slice(&u64::MAX.to_le_bytes());
        desc.extend_from_slice(&0x1000u64.to_le_bytes());
        assert!(parse_file_note(8, ByteOrder::Little, &desc).is_none());
    }

    #[test]
    fn test_parse_prstatus_x86()
    {
        let mut desc = vec![0u8; 144];
        desc[24..28].copy_from_slice(&77u32.to_le_bytes());
        let reg = |index: usize| 72 + index * 4;
        desc[reg(5)..reg(5) + 4].copy_from_slice(&0xbfff_0010u32.to_le_bytes());
        desc[reg(12)..reg(12) + 4].copy_from_slice(&0x0804_8123u32.to_le_bytes());
        desc[reg(15)..reg(15) + 4].copy_from_slice(&0xbfff_0000u32.to_le_bytes());

        let thread = parse_prstatus(Architecture::X86, ByteOrder::Little, &desc).unwrap();
        assert_eq!(thread.tid, ThreadId(77));
        assert_eq!(thread.registers.pc, Address::from(0x0804_8123));
        assert_eq!(thread.registers.fp, Address::from(0xbfff_0010));
        assert_eq!(thread.registers.sp, Address::from(0xbfff_0000));
        assert_eq!(thread.registers.general.len(), 17);
    }

    #[test]
    fn test_parse_prstatus_truncated()
    {
        assert!(parse_prstatus(Architecture::X86_64, ByteOrder::Little, &[0u8; 100]).is_none());
    }

    #[test]
    fn test_region_name_prefers_file_mapping()
    {
        let files = vec![FileMapping {
            start: 0x400000,
            end: 0x402000,
            path: "/usr/bin/app".to_string(),
        }];
        let mapped = LoadSegment {
            start: 0x401000,
            end: 0x402000,
            file_offset: 0,
            captured: 0,
        };
        let anonymous = LoadSegment {
            start: 0x900000,
            end: 0x901000,
            file_offset: 0,
            captured: 0,
        };

        assert_eq!(region_name(&mapped, &files), "/usr/bin/app:401000-402000");
        assert_eq!(region_name(&anonymous, &files), ANONYMOUS_REGION);
    }
}

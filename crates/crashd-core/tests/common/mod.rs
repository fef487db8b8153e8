//! Shared helpers for integration tests.
//!
//! [`CoreBuilder`] writes minimal little-endian ELF64 core files: one
//! `PT_NOTE` segment with `NT_PRSTATUS` / `NT_FILE` notes followed by the
//! `PT_LOAD` segments.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub const ET_CORE: u16 = 4;
pub const EM_X86_64: u16 = 62;

const EHDR_LEN: usize = 64;
const PHDR_LEN: usize = 56;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const NT_PRSTATUS: u32 = 1;
const NT_FILE: u32 = 0x4649_4c45;

/// `struct elf_prstatus` on x86-64.
const PRSTATUS_LEN: usize = 336;
const PRSTATUS_PID: usize = 32;
const PRSTATUS_REGS: usize = 112;
const RBP: usize = 4;
const RIP: usize = 16;
const RSP: usize = 19;

struct Segment
{
    vaddr: u64,
    data: Vec<u8>,
    mem_size: u64,
}

struct Mapping
{
    start: u64,
    end: u64,
    path: String,
}

struct Thread
{
    tid: u32,
    pc: u64,
    fp: u64,
    sp: u64,
}

/// Builder for x86-64 ELF core files.
pub struct CoreBuilder
{
    e_type: u16,
    machine: u16,
    segments: Vec<Segment>,
    mappings: Vec<Mapping>,
    threads: Vec<Thread>,
}

impl Default for CoreBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl CoreBuilder
{
    pub fn new() -> Self
    {
        Self {
            e_type: ET_CORE,
            machine: EM_X86_64,
            segments: Vec::new(),
            mappings: Vec::new(),
            threads: Vec::new(),
        }
    }

    pub fn machine(mut self, machine: u16) -> Self
    {
        self.machine = machine;
        self
    }

    pub fn file_type(mut self, e_type: u16) -> Self
    {
        self.e_type = e_type;
        self
    }

    /// Fully captured, zero-filled segment.
    pub fn segment(mut self, vaddr: u64, size: usize) -> Self
    {
        self.segments.push(Segment {
            vaddr,
            data: vec![0; size],
            mem_size: size as u64,
        });
        self
    }

    /// Segment present in memory but with no bytes in the file.
    pub fn uncaptured_segment(mut self, vaddr: u64, mem_size: u64) -> Self
    {
        self.segments.push(Segment {
            vaddr,
            data: Vec::new(),
            mem_size,
        });
        self
    }

    /// Store a little-endian u64 inside an existing captured segment.
    pub fn word(mut self, address: u64, value: u64) -> Self
    {
        let segment = self
            .segments
            .iter_mut()
            .find(|segment| address >= segment.vaddr && address + 8 <= segment.vaddr + segment.data.len() as u64)
            .expect("word outside every captured segment");
        let offset = (address - segment.vaddr) as usize;
        segment.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        self
    }

    /// `NT_FILE` entry naming `[start, end)` after `path`.
    pub fn mapped_file(mut self, start: u64, end: u64, path: &str) -> Self
    {
        self.mappings.push(Mapping {
            start,
            end,
            path: path.to_string(),
        });
        self
    }

    pub fn thread(mut self, tid: u32, pc: u64, fp: u64) -> Self
    {
        self.threads.push(Thread { tid, pc, fp, sp: fp });
        self
    }

    pub fn build(&self) -> Vec<u8>
    {
        let notes = self.notes();
        let phnum = 1 + self.segments.len();
        let notes_offset = EHDR_LEN + phnum * PHDR_LEN;
        let mut data_offset = align8(notes_offset + notes.len());

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        push_u16(&mut out, self.e_type);
        push_u16(&mut out, self.machine);
        push_u32(&mut out, 1);
        push_u64(&mut out, 0); // e_entry
        push_u64(&mut out, EHDR_LEN as u64); // e_phoff
        push_u64(&mut out, 0); // e_shoff
        push_u32(&mut out, 0); // e_flags
        push_u16(&mut out, EHDR_LEN as u16);
        push_u16(&mut out, PHDR_LEN as u16);
        push_u16(&mut out, phnum as u16);
        push_u16(&mut out, 64); // e_shentsize
        push_u16(&mut out, 0); // e_shnum
        push_u16(&mut out, 0); // e_shstrndx
        assert_eq!(out.len(), EHDR_LEN);

        push_phdr(&mut out, PT_NOTE, notes_offset as u64, 0, notes.len() as u64, 0, 4);
        let mut placements = Vec::new();
        for segment in &self.segments {
            push_phdr(
                &mut out,
                PT_LOAD,
                data_offset as u64,
                segment.vaddr,
                segment.data.len() as u64,
                segment.mem_size,
                0x1000,
            );
            placements.push(data_offset);
            data_offset = align8(data_offset + segment.data.len());
        }

        out.extend_from_slice(&notes);
        for (segment, offset) in self.segments.iter().zip(placements) {
            out.resize(offset, 0);
            out.extend_from_slice(&segment.data);
        }
        out
    }

    pub fn write_to(&self, path: &Path)
    {
        fs::write(path, self.build()).expect("write core file");
    }

    fn notes(&self) -> Vec<u8>
    {
        let mut notes = Vec::new();
        for thread in &self.threads {
            let mut desc = vec![0u8; PRSTATUS_LEN];
            desc[PRSTATUS_PID..PRSTATUS_PID + 4].copy_from_slice(&thread.tid.to_le_bytes());
            for (index, value) in [(RBP, thread.fp), (RIP, thread.pc), (RSP, thread.sp)] {
                let at = PRSTATUS_REGS + index * 8;
                desc[at..at + 8].copy_from_slice(&value.to_le_bytes());
            }
            push_note(&mut notes, NT_PRSTATUS, &desc);
        }

        if !self.mappings.is_empty() {
            let mut desc = Vec::new();
            push_u64(&mut desc, self.mappings.len() as u64);
            push_u64(&mut desc, 0x1000);
            for mapping in &self.mappings {
                push_u64(&mut desc, mapping.start);
                push_u64(&mut desc, mapping.end);
                push_u64(&mut desc, 0);
            }
            for mapping in &self.mappings {
                desc.extend_from_slice(mapping.path.as_bytes());
                desc.push(0);
            }
            push_note(&mut notes, NT_FILE, &desc);
        }
        notes
    }
}

fn align4(value: usize) -> usize
{
    (value + 3) & !3
}

fn align8(value: usize) -> usize
{
    (value + 7) & !7
}

fn push_u16(out: &mut Vec<u8>, value: u16)
{
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32)
{
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, value: u64)
{
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_phdr(out: &mut Vec<u8>, p_type: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64)
{
    push_u32(out, p_type);
    push_u32(out, 4); // PF_R
    push_u64(out, offset);
    push_u64(out, vaddr);
    push_u64(out, 0); // p_paddr
    push_u64(out, filesz);
    push_u64(out, memsz);
    push_u64(out, align);
}

fn push_note(out: &mut Vec<u8>, n_type: u32, desc: &[u8])
{
    let name = b"CORE\0";
    push_u32(out, name.len() as u32);
    push_u32(out, desc.len() as u32);
    push_u32(out, n_type);
    out.extend_from_slice(name);
    out.resize(align4(out.len()), 0);
    out.extend_from_slice(desc);
    out.resize(align4(out.len()), 0);
}

//! Frame-pointer walks over synthetic and on-disk cores.

mod common;

use std::sync::Arc;

use common::CoreBuilder;
use crashd_core::backtrace::DEFAULT_MAX_FRAMES;
use crashd_core::coredump::SyntheticCore;
use crashd_core::symbols::{CacheStats, LoadedObject};
use crashd_core::types::{Architecture, MemoryRegion};
use crashd_core::{BacktraceWalker, CoreDumpSession, ObjectResolver};

fn resolver() -> ObjectResolver
{
    ObjectResolver::new("/nonexistent/usr/lib", "Loader.so")
}

fn render(image: SyntheticCore) -> String
{
    let session = CoreDumpSession::from_image(image);
    let mut resolver = resolver();
    BacktraceWalker::new(&session, &mut resolver, DEFAULT_MAX_FRAMES)
        .report()
        .to_string()
}

#[test]
fn test_two_frame_walk()
{
    let image = SyntheticCore::new(Architecture::X86)
        .with_region("libfoo.so:100-200", 0x100, 0x200)
        .with_region("main:200-300", 0x200, 0x300)
        .with_word(0x254, 0x220)
        .with_word(0x250, 0)
        .with_thread(1, 0x150, 0x250);

    assert_eq!(
        render(image),
        "Backtrace for thread #0, tid=1\n0x150: [libfoo.so] ???\n0x220: [main] ???\n"
    );
}

#[test]
fn test_loader_frames_are_hidden_but_walk_continues()
{
    // loader pc -> main pc -> libc pc -> end
    let image = SyntheticCore::new(Architecture::X86_64)
        .with_region("Loader.so: .text", 0x1000, 0x2000)
        .with_region("main: .text", 0x4000, 0x5000)
        .with_region("libc.so: .text", 0x8000, 0x9000)
        .with_region("stack", 0xa000, 0xb000)
        .with_word(0xa000, 0xa100)
        .with_word(0xa008, 0x4010)
        .with_word(0xa100, 0)
        .with_word(0xa108, 0x8020)
        .with_thread(5, 0x1010, 0xa000);

    assert_eq!(
        render(image),
        "Backtrace for thread #0, tid=5\n0x4010: [main] ???\n0x8020: [libc.so] ???\n"
    );
}

#[test]
fn test_cyclic_frame_chain_terminates()
{
    let image = SyntheticCore::new(Architecture::X86_64)
        .with_region("main: .text", 0x4000, 0x5000)
        .with_region("stack", 0xa000, 0xb000)
        .with_word(0xa000, 0xa000)
        .with_word(0xa008, 0x4444)
        .with_thread(9, 0x4010, 0xa000);
    let session = CoreDumpSession::from_image(image);
    let mut resolver = resolver();

    let threads = BacktraceWalker::new(&session, &mut resolver, 32).walk_all();
    assert_eq!(threads[0].frames.len(), 32);
    assert!(threads[0].truncated);
}

#[test]
fn test_unresolvable_object_keeps_its_name()
{
    let image = SyntheticCore::new(Architecture::X86_64)
        .with_mapped_region("libgone.so: .text", 0x7000, 0x8000)
        .with_thread(2, 0x7abc, 0);

    assert_eq!(render(image), "Backtrace for thread #0, tid=2\n0x7abc: [libgone.so] ???\n");
}

#[test]
fn test_threads_are_numbered_in_dump_order()
{
    let image = SyntheticCore::new(Architecture::X86_64)
        .with_thread(300, 0x10, 0)
        .with_thread(100, 0x20, 0)
        .with_thread(200, 0, 0);

    assert_eq!(
        render(image),
        "Backtrace for thread #0, tid=300\n0x10: ???\n\
         Backtrace for thread #1, tid=100\n0x20: ???\n\
         Backtrace for thread #2, tid=200\n"
    );
}

#[test]
fn test_elf_core_walk()
{
    const STACK: u64 = 0x7ffe_0000_0000;
    const LIB: u64 = 0x7f00_0000_0000;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("core.elf");
    CoreBuilder::new()
        .uncaptured_segment(LIB, 0x1000)
        .uncaptured_segment(LIB + 0x1000, 0x1000)
        .segment(STACK, 0x100)
        .word(STACK + 0x20, 0)
        .word(STACK + 0x28, LIB + 0x1abc)
        .mapped_file(LIB, LIB + 0x2000, "/nonexistent/libbar.so")
        .thread(77, LIB + 0x150, STACK + 0x20)
        .write_to(&path);

    let session = CoreDumpSession::open(&path).unwrap();
    let mut resolver = resolver();
    let report = BacktraceWalker::new(&session, &mut resolver, DEFAULT_MAX_FRAMES).report();

    assert_eq!(report.dump_path.as_deref(), Some(path.as_path()));
    assert_eq!(
        report.to_string(),
        "Backtrace for thread #0, tid=77\n\
         0x7f0000000150: [/nonexistent/libbar.so] ???\n\
         0x7f0000001abc: [/nonexistent/libbar.so] ???\n"
    );
    // Both frames tried the same path; failures are not cached.
    assert_eq!(resolver.stats().failures, 2);
    assert_eq!(resolver.cached_objects(), 0);
}

/// Region backing `object` and a pc landing on its first sized text symbol.
fn region_and_pc(object: &LoadedObject) -> Option<(MemoryRegion, u64, String)>
{
    let symbol = object.symbols().iter().find(|symbol| symbol.size > 0)?.clone();
    let last = object.symbols().last()?;
    let span = last.address + last.size.max(1) - object.image_base() + 0x1000;

    let base = if object.is_relocatable() {
        0x5555_0000_0000
    } else {
        object.image_base()
    };
    let pc = base + (symbol.address - object.image_base());
    let name = format!("{}: .text", object.path().display());
    let region = MemoryRegion::new(crashd_core::types::RegionId(0), name, base.into(), (base + span).into());
    Some((region, pc, symbol.name))
}

#[test]
fn test_symbolicates_against_real_object_and_caches_it()
{
    let exe = std::env::current_exe().unwrap();
    let object = LoadedObject::load(&exe).unwrap();
    let Some((region, pc, expected)) = region_and_pc(&object) else {
        // Stripped test binary; nothing to look up.
        return;
    };

    let image = SyntheticCore::new(Architecture::X86_64)
        .with_mapped_region(region.name.clone(), region.start.value(), region.end.value())
        .with_thread(1, pc, 0);
    let session = CoreDumpSession::from_image(image);
    let mut resolver = resolver();

    let first = resolver.resolve(&region).unwrap();
    let second = resolver.resolve(&region).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        resolver.stats(),
        CacheStats {
            hits: 1,
            loads: 1,
            failures: 0,
        }
    );

    let threads = BacktraceWalker::new(&session, &mut resolver, DEFAULT_MAX_FRAMES).walk_all();
    let frame = &threads[0].frames[0];
    assert_eq!(frame.object_name.as_deref(), Some(exe.to_str().unwrap()));
    assert_eq!(frame.symbol.as_ref().map(|symbol| symbol.raw()), Some(expected.as_str()));
    // The walk reused the cached object.
    assert_eq!(resolver.stats().loads, 1);
    assert_eq!(resolver.cached_objects(), 1);
}

#[test]
fn test_caller_frame_is_attributed_to_the_calling_function()
{
    const STACK: u64 = 0x7ffe_0000_0000;

    let exe = std::env::current_exe().unwrap();
    let object = LoadedObject::load(&exe).unwrap();
    // Two back-to-back sized functions: a return address equal to the start
    // of the second one belongs to a call at the very end of the first.
    let Some(pair) = object.symbols().windows(2).find(|pair| {
        pair[0].size > 0 && pair[1].size > 0 && pair[0].address + pair[0].size == pair[1].address
    }) else {
        return;
    };
    let (calling, next) = (pair[0].name.clone(), pair[1].clone());
    let Some((region, _, _)) = region_and_pc(&object) else {
        return;
    };

    let runtime = region.start.value() + (next.address - object.image_base());
    let image = SyntheticCore::new(Architecture::X86_64)
        .with_mapped_region(region.name.clone(), region.start.value(), region.end.value())
        .with_region("stack", STACK, STACK + 0x10)
        .with_word(STACK, 0)
        .with_word(STACK + 8, runtime)
        .with_thread(1, runtime, STACK);
    let session = CoreDumpSession::from_image(image);
    let mut resolver = resolver();
    let threads = BacktraceWalker::new(&session, &mut resolver, DEFAULT_MAX_FRAMES).walk_all();

    let frames = &threads[0].frames;
    assert_eq!(frames.len(), 2);
    // Same address, different roles.
    assert_eq!(frames[0].pc, frames[1].pc);
    assert_eq!(frames[0].symbol.as_ref().map(|symbol| symbol.raw()), Some(next.name.as_str()));
    assert_eq!(frames[1].symbol.as_ref().map(|symbol| symbol.raw()), Some(calling.as_str()));
}

mod common;

use common::*;
use serde::Deserialize;
use spin::Mutex;

use wmap::memory::{FramePool, MmapConfig, VirtualAddress, PAGE_SIZE};
use wmap::process::{Process, ProcessId};
use wmap::syscalls::{
    handle_syscall, SystemCall, SystemCallArgs, SystemCallError, SystemCallNumber,
    SystemCallResult, MAP_ANONYMOUS, MAP_FIXED, MAP_PRIVATE, MAP_SHARED, MREMAP_MAYMOVE,
};

/// Wire shape of the `getwmapinfo` snapshot
#[derive(Debug, Deserialize)]
struct WmapInfo {
    total_mmaps: usize,
    mappings: Vec<(usize, usize, usize)>,
}

/// Wire shape of the `getpgdirinfo` snapshot
#[derive(Debug, Deserialize)]
struct PgdirInfo {
    n_upages: usize,
    pages: Vec<(usize, usize)>,
}

struct Fixture<'a> {
    process: Process<MemFileTable>,
    frames: Mutex<FramePool<'a>>,
}

impl Fixture<'_> {
    fn call(&self, number: SystemCallNumber, args: [usize; 6], out: &mut [u8]) -> SystemCallResult {
        let syscall = SystemCall::new(number, SystemCallArgs::from_array(args), self.process.id());
        handle_syscall(syscall, &self.process, &self.frames, out)
    }

    fn wmap(&self, addr: usize, length: usize, flags: usize, fd: usize) -> SystemCallResult {
        self.call(SystemCallNumber::Wmap, [addr, length, flags, fd, 0, 0], &mut [])
    }
}

fn fixture(memory: &mut [wmap::memory::Page]) -> Fixture<'_> {
    Fixture {
        process: Process::new(ProcessId::new(7), "user", MmapConfig::DEFAULT, MemFileTable::new())
            .expect("process"),
        frames: Mutex::new(frame_pool(memory)),
    }
}

#[test]
fn wmap_returns_addresses_and_error_codes() {
    let mut memory = page_memory(4);
    let fx = fixture(&mut memory);
    let anon = MAP_ANONYMOUS | MAP_PRIVATE;

    assert_eq!(fx.wmap(0, 8192, anon, usize::MAX).address(), Some(0x6000_0000));
    assert_eq!(fx.wmap(0, 4096, anon, usize::MAX).address(), Some(0x6000_2000));

    let overlap = fx.wmap(0x6000_0000, 4096, anon | MAP_FIXED, usize::MAX);
    assert_eq!(overlap.error(), Some(SystemCallError::AddressInUse));

    let both = fx.wmap(0, 4096, MAP_ANONYMOUS | MAP_SHARED | MAP_PRIVATE, usize::MAX);
    assert_eq!(both.error(), Some(SystemCallError::InvalidArgument));

    let unknown_flag = fx.wmap(0, 4096, anon | 0x100, usize::MAX);
    assert_eq!(unknown_flag.error(), Some(SystemCallError::InvalidArgument));

    let zero = fx.wmap(0, 0, anon, usize::MAX);
    assert_eq!(zero.error(), Some(SystemCallError::InvalidArgument));

    let outside = fx.wmap(0x1000, 4096, anon | MAP_FIXED, usize::MAX);
    assert_eq!(outside.error(), Some(SystemCallError::InvalidAddress));

    let bad_fd = fx.wmap(0, 4096, MAP_SHARED, 9);
    assert_eq!(bad_fd.error(), Some(SystemCallError::InvalidArgument));

    assert_eq!(fx.process.stats().system_calls, 8);
}

#[test]
fn negative_lengths_are_invalid_arguments() {
    let mut memory = page_memory(1);
    let fx = fixture(&mut memory);
    let anon = MAP_ANONYMOUS | MAP_PRIVATE;
    let minus_one = (-1isize) as usize;

    assert_eq!(fx.wmap(0, minus_one, anon, 0).error(), Some(SystemCallError::InvalidArgument));
    assert_eq!(
        fx.wmap(LOW, minus_one, anon | MAP_FIXED, 0).error(),
        Some(SystemCallError::InvalidArgument)
    );

    fx.wmap(LOW, PAGE_SIZE, anon | MAP_FIXED, 0);
    let shrink_negative = fx.call(
        SystemCallNumber::Wremap,
        [LOW, PAGE_SIZE, minus_one, MREMAP_MAYMOVE, 0, 0],
        &mut [],
    );
    assert_eq!(shrink_negative.error(), Some(SystemCallError::InvalidArgument));
    assert_eq!(fx.process.query_mappings().mappings[0].length, PAGE_SIZE);
}

#[test]
fn file_backed_wmap_uses_the_descriptor() {
    let mut memory = page_memory(4);
    let fx = fixture(&mut memory);
    let fd = fx.process.files().open(3, pattern(PAGE_SIZE));

    let result = fx.wmap(0, PAGE_SIZE, MAP_SHARED, fd.as_u32() as usize);
    assert_eq!(result.address(), Some(LOW));
}

#[test]
fn wunmap_and_wremap() {
    let mut memory = page_memory(4);
    let fx = fixture(&mut memory);
    let anon = MAP_ANONYMOUS | MAP_PRIVATE | MAP_FIXED;
    fx.wmap(LOW, PAGE_SIZE, anon, 0);
    fx.wmap(LOW + PAGE_SIZE, PAGE_SIZE, anon, 0);

    let stuck = fx.call(SystemCallNumber::Wremap, [LOW, PAGE_SIZE, 2 * PAGE_SIZE, 0, 0, 0], &mut []);
    assert_eq!(stuck.error(), Some(SystemCallError::AddressInUse));

    let moved = fx.call(
        SystemCallNumber::Wremap,
        [LOW, PAGE_SIZE, 2 * PAGE_SIZE, MREMAP_MAYMOVE, 0, 0],
        &mut [],
    );
    assert_eq!(moved.address(), Some(LOW + 2 * PAGE_SIZE));

    let bad_flags = fx.call(SystemCallNumber::Wremap, [LOW + 2 * PAGE_SIZE, 2 * PAGE_SIZE, PAGE_SIZE, 2, 0, 0], &mut []);
    assert_eq!(bad_flags.error(), Some(SystemCallError::InvalidArgument));

    let unmapped = fx.call(SystemCallNumber::Wunmap, [LOW + 2 * PAGE_SIZE, 0, 0, 0, 0, 0], &mut []);
    assert_eq!(unmapped, SystemCallResult::ok(0));
    let again = fx.call(SystemCallNumber::Wunmap, [LOW + 2 * PAGE_SIZE, 0, 0, 0, 0, 0], &mut []);
    assert_eq!(again.error(), Some(SystemCallError::NotFound));
}

#[test]
fn getwmapinfo_serializes_the_region_table() {
    let mut memory = page_memory(4);
    let fx = fixture(&mut memory);
    let anon = MAP_ANONYMOUS | MAP_PRIVATE;
    fx.wmap(0, 8192, anon, 0);
    fx.wmap(0, 100, anon, 0);
    fx.process
        .handle_page_fault(VirtualAddress::new(LOW + PAGE_SIZE), &fx.frames)
        .expect("fault");

    let mut out = [0u8; 256];
    let result = fx.call(SystemCallNumber::GetWmapInfo, [0; 6], &mut out);
    let used = result.address().expect("bytes written");

    let info: WmapInfo = postcard::from_bytes(&out[..used]).expect("decode");
    assert_eq!(info.total_mmaps, 2);
    assert_eq!(info.mappings, [(LOW, 8192, 1), (LOW + 2 * PAGE_SIZE, 100, 0)]);
}

#[test]
fn getpgdirinfo_serializes_resident_pages() {
    let mut memory = page_memory(4);
    let fx = fixture(&mut memory);
    fx.wmap(0, 3 * PAGE_SIZE, MAP_ANONYMOUS | MAP_PRIVATE, 0);
    for offset in [2 * PAGE_SIZE, 0] {
        fx.process
            .handle_page_fault(VirtualAddress::new(LOW + offset), &fx.frames)
            .expect("fault");
    }

    let mut out = [0u8; 256];
    let used = fx
        .call(SystemCallNumber::GetPgdirInfo, [0; 6], &mut out)
        .address()
        .expect("bytes written");

    let info: PgdirInfo = postcard::from_bytes(&out[..used]).expect("decode");
    assert_eq!(info.n_upages, 2);
    let addresses: Vec<usize> = info.pages.iter().map(|(va, _)| *va).collect();
    assert_eq!(addresses, [LOW, LOW + 2 * PAGE_SIZE]);
    assert!(info.pages.iter().all(|(_, pa)| *pa >= POOL_BASE.as_usize()));
}

#[test]
fn undersized_info_buffer_is_rejected() {
    let mut memory = page_memory(1);
    let fx = fixture(&mut memory);
    for _ in 0..4 {
        fx.wmap(0, PAGE_SIZE, MAP_ANONYMOUS | MAP_PRIVATE, 0);
    }

    let mut out = [0u8; 4];
    let result = fx.call(SystemCallNumber::GetWmapInfo, [0; 6], &mut out);
    assert_eq!(result.error(), Some(SystemCallError::InvalidArgument));
}

#[test]
fn calls_for_another_process_are_refused() {
    let mut memory = page_memory(1);
    let fx = fixture(&mut memory);
    let syscall = SystemCall::new(
        SystemCallNumber::Wmap,
        SystemCallArgs::from_array([0, PAGE_SIZE, MAP_ANONYMOUS | MAP_PRIVATE, 0, 0, 0]),
        ProcessId::INIT,
    );

    let result = handle_syscall(syscall, &fx.process, &fx.frames, &mut []);
    assert_eq!(result.error(), Some(SystemCallError::PermissionDenied));
    assert_eq!(fx.process.query_mappings().total_mmaps, 0);
}

#[test]
fn raw_trap_decoding() {
    let args = SystemCallArgs::from_array([LOW, 0, 0, 0, 0, 0]);
    let call = SystemCall::decode(23, args, ProcessId::INIT).expect("decode");
    assert_eq!(call.number, SystemCallNumber::Wunmap);
    assert_eq!(
        SystemCall::decode(200, args, ProcessId::INIT).map(|call| call.number),
        Err(SystemCallError::InvalidSystemCall)
    );
}

//! Process Memory Context
//!
//! This module provides the part of the process control block that the
//! mapping subsystem works on: the process's address space and its open
//! file table, each behind its own lock.
//!
//! - Mapping operations (map, unmap, remap) under the address space lock
//! - Page-fault entry point with file I/O outside that lock
//! - Read-only snapshots for diagnostics
//!
//! # Lock Order
//!
//! ```text
//! address space -> frame allocator -> open files
//! ```
//!
//! A path may skip a lock but never takes them in another order. The fault
//! path takes them one at a time and never nests.

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

use crate::debug_print;
use crate::file::{FileDescriptor, FileTable};
use crate::memory::virtual_memory::{alloc_filled, finish_fault};
use crate::memory::{
    AddressSpace, FaultPlan, FaultResolution, FrameAllocator, MapFlags, MappingSnapshot,
    MemoryError, MemoryResult, MmapConfig, RemapFlags, ResidentPageSnapshot, VirtualAddress,
    PAGE_SIZE,
};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new process ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Special process ID for the kernel
    pub const KERNEL: ProcessId = ProcessId(0);
    /// Special process ID for the init process
    pub const INIT: ProcessId = ProcessId(1);
}

/// Per-process counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    /// Page faults taken
    pub page_faults: u64,
    /// Mapping system calls made
    pub system_calls: u64,
}

/// Memory context of one process
pub struct Process<F: FileTable> {
    /// Process identifier
    id: ProcessId,
    /// Process name
    name: heapless::String<32>,
    /// Mapping state, exclusively owned by this process
    address_space: Mutex<AddressSpace>,
    /// Open files
    files: Mutex<F>,
    page_faults: AtomicU64,
    system_calls: AtomicU64,
}

impl<F: FileTable> Process<F> {
    /// Create a process with an empty address space
    ///
    /// Fails with `InvalidArgument` for a name over 32 bytes or an invalid
    /// configuration.
    pub fn new(id: ProcessId, name: &str, config: MmapConfig, files: F) -> MemoryResult<Self> {
        let mut process_name = heapless::String::new();
        process_name
            .push_str(name)
            .map_err(|_| MemoryError::InvalidArgument)?;

        Ok(Self {
            id,
            name: process_name,
            address_space: Mutex::new(AddressSpace::new(config)?),
            files: Mutex::new(files),
            page_faults: AtomicU64::new(0),
            system_calls: AtomicU64::new(0),
        })
    }

    /// Process identifier
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock and return the address space
    pub fn address_space(&self) -> MutexGuard<'_, AddressSpace> {
        self.address_space.lock()
    }

    /// Lock and return the open-file table
    pub fn files(&self) -> MutexGuard<'_, F> {
        self.files.lock()
    }

    /// Counters
    pub fn stats(&self) -> ProcessStats {
        ProcessStats {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            system_calls: self.system_calls.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count_system_call(&self) {
        self.system_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve a region; see [`AddressSpace::map`]
    pub fn map(
        &self,
        addr: VirtualAddress,
        length: usize,
        flags: MapFlags,
        fd: Option<FileDescriptor>,
    ) -> MemoryResult<VirtualAddress> {
        let mut space = self.address_space.lock();
        let files = self.files.lock();
        space.map(addr, length, flags, fd, &*files)
    }

    /// Remove the region based at `addr`; see [`AddressSpace::unmap`]
    ///
    /// Write-back of a shared file region runs with the address space
    /// locked, so a failed write leaves the region exactly as it was.
    pub fn unmap<A: FrameAllocator>(&self, addr: VirtualAddress, frames: &Mutex<A>) -> MemoryResult<()> {
        let mut space = self.address_space.lock();
        let mut frames = frames.lock();
        let mut files = self.files.lock();
        space.unmap(addr, &mut *frames, &mut *files)
    }

    /// Resize the region based at `old`; see [`AddressSpace::remap`]
    pub fn remap<A: FrameAllocator>(
        &self,
        old: VirtualAddress,
        old_size: usize,
        new_size: usize,
        flags: RemapFlags,
        frames: &Mutex<A>,
    ) -> MemoryResult<VirtualAddress> {
        let mut space = self.address_space.lock();
        let mut frames = frames.lock();
        let mut files = self.files.lock();
        space.remap(
            old,
            old_size,
            new_size,
            flags.contains(RemapFlags::MAYMOVE),
            &mut *frames,
            &mut *files,
        )
    }

    /// Snapshot of the process's regions
    pub fn query_mappings(&self) -> MappingSnapshot {
        self.address_space.lock().describe_regions()
    }

    /// Snapshot of the process's resident user pages
    pub fn query_resident_pages(&self) -> ResidentPageSnapshot {
        self.address_space.lock().describe_resident_pages()
    }

    /// Page-fault hook, called by the trap handler before it gives up
    ///
    /// The address space is unlocked while the page is read from its file
    /// and a frame is filled; the result is committed only if the region
    /// still covers the page afterwards.
    pub fn handle_page_fault<A: FrameAllocator>(
        &self,
        addr: VirtualAddress,
        frames: &Mutex<A>,
    ) -> MemoryResult<FaultResolution> {
        self.page_faults.fetch_add(1, Ordering::Relaxed);

        let plan = self.address_space.lock().plan_fault(addr);
        let fill = match plan {
            FaultPlan::NotOurs => return Ok(FaultResolution::NotOurs),
            FaultPlan::Resident => return Ok(FaultResolution::Resolved),
            FaultPlan::Fill(fill) => fill,
        };

        let mut contents = [0u8; PAGE_SIZE];
        if fill.reads_file() {
            fill.load(&mut *self.files.lock(), &mut contents)?;
        }
        let frame = alloc_filled(&mut *frames.lock(), &contents).inspect_err(|error| {
            debug_print!(WARNING, "No frame for fault at {:#x}: {}", addr, error);
        })?;

        let outcome = self.address_space.lock().commit_fault(&fill, frame);
        finish_fault(outcome, frame, &mut *frames.lock())
    }
}

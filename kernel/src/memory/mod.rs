//! Memory Management Subsystem
//!
//! This module provides the per-process mapping subsystem of the kernel.
//! A process reserves a range of its mapping window, backs it with anonymous
//! zero-filled memory or with an open file, and the range is populated one
//! page at a time from page faults.
//!
//! - Physical frame pool (buddy system over frame numbers)
//! - Two-level page table with on-demand level-2 tables
//! - Region table (sorted, non-overlapping, bounded)
//! - Address space (fault resolution, unmap, remap, introspection)
//!
//! # Design Principles
//!
//! - The region table is the single source of truth for what is mapped where
//! - Every operation leaves the table sorted by base and overlap-free
//! - No partially installed page and no leaked frame on any failure path
//! - Bounded containers only; nothing here grows without limit
//!
//! # Memory Layout
//!
//! ```text
//! Process Virtual Address Space:
//! 0x00000000 - 0x5FFFFFFF : Program image, heap and stack
//! 0x60000000 - 0x7FFFFFFF : Mapping window (wmap regions)
//! 0x80000000 - 0xFFFFFFFF : Kernel
//! ```

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use core::fmt;
use serde::Serialize;
use static_assertions::const_assert;
use thiserror_no_std::Error;

use crate::file::FileError;

pub mod allocator;
pub mod config;
pub mod introspection;
pub mod page_table;
pub mod region;
pub mod virtual_memory;

pub use allocator::FramePool;
pub use config::{MapWindow, MmapConfig};
pub use introspection::{MappingInfo, MappingSnapshot, ResidentPage, ResidentPageSnapshot};
pub use page_table::{PageTable, PageTableEntry, PteFlags};
pub use region::{Backing, MapFlags, Region, RegionTable, RemapFlags, Sharing, MAX_LENGTH};
pub use virtual_memory::{AddressSpace, AddressSpaceStats, CommitOutcome, FaultPlan, FaultResolution, PageFill};

/// Page size in bytes
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of the page size)
pub const PAGE_SHIFT: usize = 12;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Contents of one physical frame
pub type Page = [u8; PAGE_SIZE];

/// Memory management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Zero length, misaligned address, conflicting flags or unknown descriptor
    #[error("invalid argument")]
    InvalidArgument,
    /// Address or resulting range lies outside the mapping window
    #[error("address range outside the mapping window")]
    OutOfRange,
    /// Placement collides with an existing region
    #[error("range overlaps an existing region")]
    Overlap,
    /// Region table is full
    #[error("region table is full")]
    CapacityExceeded,
    /// No region matches the given address
    #[error("no region at the given address")]
    NotFound,
    /// Frame allocator or page-table pool exhausted
    #[error("out of physical memory")]
    OutOfMemory,
    /// File read or write failed while filling or flushing a page
    #[error("file I/O failed: {0}")]
    Io(#[from] FileError),
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Round `value` up to the next page boundary, `None` on overflow
pub const fn page_round_up(value: usize) -> Option<usize> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// Round `value` down to a page boundary
pub const fn page_round_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// Number of pages needed to cover `length` bytes
pub const fn pages_for(length: usize) -> usize {
    length.div_ceil(PAGE_SIZE)
}

/// Virtual address in a process address space
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    /// Create a virtual address
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check whether the address sits on a page boundary
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Round down to the start of the containing page
    pub const fn align_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Round up to the next page boundary
    pub const fn align_up(self) -> Option<Self> {
        match page_round_up(self.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Add a byte offset, `None` on overflow
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Byte distance from `base` to this address
    pub const fn offset_from(self, base: Self) -> usize {
        self.0 - base.0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#x})", self.0)
    }
}

impl fmt::LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Physical address of a frame
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    /// Create a physical address
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check whether the address sits on a frame boundary
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Frame number of this address
    pub const fn frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Address of the first byte of frame `number`
    pub const fn from_frame_number(number: usize) -> Self {
        Self(number << PAGE_SHIFT)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#x})", self.0)
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Source of physical frames for fault resolution
///
/// Implementations must be callable from fault context. `frame` and
/// `frame_mut` expose the kernel's direct-map view of a frame the caller
/// currently owns.
pub trait FrameAllocator {
    /// Allocate one frame, `None` when exhausted
    fn alloc_frame(&mut self) -> Option<PhysicalAddress>;

    /// Return a frame to the allocator
    fn free_frame(&mut self, frame: PhysicalAddress);

    /// Read access to the contents of a frame
    fn frame(&self, frame: PhysicalAddress) -> Option<&Page>;

    /// Write access to the contents of a frame
    fn frame_mut(&mut self, frame: PhysicalAddress) -> Option<&mut Page>;
}

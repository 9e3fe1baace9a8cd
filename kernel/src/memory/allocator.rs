//! Physical Frame Pool
//!
//! This module implements the frame allocator used by fault resolution.
//! Free frames are tracked by a buddy system over physical frame numbers,
//! and frame contents are reached through the kernel's direct map of the
//! pool, handed in as a slice of pages.
//!
//! # Algorithm
//!
//! The buddy allocator works by:
//! 1. Dividing the pool into power-of-2 sized blocks of frames
//! 2. Maintaining free lists for each block size
//! 3. Splitting larger blocks when a single frame is needed
//! 4. Coalescing adjacent free blocks on release
//!
//! # Time Complexity
//!
//! - Allocation: O(log n) where n is the number of orders
//! - Deallocation: O(log n)

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use alloc::vec;
use alloc::vec::Vec;
use buddy_system_allocator::FrameAllocator as BuddyFrames;

use super::{FrameAllocator, MemoryError, MemoryResult, Page, PhysicalAddress};
use crate::debug_print;

/// Maximum buddy order (2^MAX_ORDER frames per block)
pub const MAX_ORDER: usize = 32;

/// Allocation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Total allocations
    pub total_allocations: u64,
    /// Total deallocations
    pub total_deallocations: u64,
    /// Current active allocations
    pub active_allocations: u64,
    /// Failed allocations
    pub failed_allocations: u64,
    /// Highest number of simultaneously active allocations
    pub peak_allocations: u64,
    /// Frees of addresses that were not allocated from this pool
    pub rejected_frees: u64,
}

/// Frame allocator over a contiguous, direct-mapped pool of frames
pub struct FramePool<'a> {
    /// Free frame numbers
    buddy: BuddyFrames<MAX_ORDER>,
    /// Direct-map view of the pool, one entry per frame
    memory: &'a mut [Page],
    /// Physical address of `memory[0]`
    base: PhysicalAddress,
    /// One bit per frame, set while the frame is handed out
    in_use: Vec<u64>,
    /// Allocation statistics
    stats: AllocationStats,
}

impl<'a> FramePool<'a> {
    /// Create a pool covering `memory`, which is mapped at physical `base`
    pub fn new(base: PhysicalAddress, memory: &'a mut [Page]) -> MemoryResult<Self> {
        if !base.is_page_aligned() || memory.is_empty() {
            return Err(MemoryError::InvalidArgument);
        }
        let first = base.frame_number();
        let last = first
            .checked_add(memory.len())
            .ok_or(MemoryError::OutOfRange)?;

        let mut buddy = BuddyFrames::<MAX_ORDER>::new();
        buddy.add_frame(first, last);

        debug_print!(
            INFO,
            "Frame pool initialized: {} frames at {:#x}",
            memory.len(),
            base
        );

        Ok(Self {
            buddy,
            in_use: vec![0; memory.len().div_ceil(64)],
            memory,
            base,
            stats: AllocationStats::default(),
        })
    }

    /// Total number of frames in the pool
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Number of frames currently free
    pub fn free_frames(&self) -> usize {
        self.capacity() - self.stats.active_allocations as usize
    }

    /// Allocation statistics
    pub fn stats(&self) -> AllocationStats {
        self.stats
    }

    /// Check whether `frame` is currently allocated from this pool
    pub fn is_allocated(&self, frame: PhysicalAddress) -> bool {
        self.index_of(frame)
            .is_some_and(|index| self.bit(index))
    }

    /// Index of `frame` in the pool, `None` if outside or unaligned
    fn index_of(&self, frame: PhysicalAddress) -> Option<usize> {
        if !frame.is_page_aligned() || frame < self.base {
            return None;
        }
        let index = frame.frame_number() - self.base.frame_number();
        (index < self.memory.len()).then_some(index)
    }

    fn bit(&self, index: usize) -> bool {
        self.in_use
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        if let Some(word) = self.in_use.get_mut(index / 64) {
            if value {
                *word |= 1 << (index % 64);
            } else {
                *word &= !(1 << (index % 64));
            }
        }
    }
}

impl FrameAllocator for FramePool<'_> {
    fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        let Some(number) = self.buddy.alloc(1) else {
            self.stats.failed_allocations += 1;
            debug_print!(WARNING, "Frame pool exhausted");
            return None;
        };

        let frame = PhysicalAddress::from_frame_number(number);
        let index = number - self.base.frame_number();
        self.set_bit(index, true);

        self.stats.total_allocations += 1;
        self.stats.active_allocations += 1;
        self.stats.peak_allocations = self.stats.peak_allocations.max(self.stats.active_allocations);
        debug_print!(TRACE, "Allocated frame {:#x}", frame);
        Some(frame)
    }

    fn free_frame(&mut self, frame: PhysicalAddress) {
        let Some(index) = self.index_of(frame).filter(|&index| self.bit(index)) else {
            self.stats.rejected_frees += 1;
            debug_print!(WARNING, "Ignoring free of unowned frame {:#x}", frame);
            return;
        };

        self.set_bit(index, false);
        self.buddy.dealloc(frame.frame_number(), 1);

        self.stats.total_deallocations += 1;
        self.stats.active_allocations -= 1;
        debug_print!(TRACE, "Freed frame {:#x}", frame);
    }

    fn frame(&self, frame: PhysicalAddress) -> Option<&Page> {
        let index = self.index_of(frame)?;
        self.memory.get(index)
    }

    fn frame_mut(&mut self, frame: PhysicalAddress) -> Option<&mut Page> {
        let index = self.index_of(frame)?;
        self.memory.get_mut(index)
    }
}

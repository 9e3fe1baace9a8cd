//! Two-Level Page Table
//!
//! Translation structure for one address space, laid out like the ARMv7
//! short-descriptor format: 4096 level-1 slots each covering 1 MiB, and
//! 256-entry level-2 tables covering 4 KiB pages.
//!
//! Level-2 tables are created on the first mapping inside their megabyte
//! and released when their last entry is cleared. The number of live
//! level-2 tables is bounded; running out is reported as `OutOfMemory`,
//! just like a failed table-node allocation on hardware.
//!
//! # Entry Format
//!
//! ```text
//! 31                    12 11          0
//! +-----------------------+-------------+
//! |  frame address        |  PteFlags   |
//! +-----------------------+-------------+
//! ```

#![deny(missing_docs)]

use bitflags::bitflags;
use heapless::{FnvIndexMap, Vec};

use super::config::{ADDRESS_LIMIT, MAX_PAGE_TABLES};
use super::{MemoryError, MemoryResult, PhysicalAddress, VirtualAddress, PAGE_SHIFT, PAGE_SIZE};

/// Number of level-1 slots
pub const L1_ENTRIES: usize = 4096;

/// Number of entries in a level-2 table
pub const L2_ENTRIES: usize = 256;

/// Shift from a virtual address to its level-1 index
const L1_SHIFT: usize = 20;

/// Mask selecting the frame address bits of an entry
const FRAME_MASK: u32 = !((PAGE_SIZE as u32) - 1);

bitflags! {
    /// Page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        /// Page is present
        const PRESENT = 1 << 0;
        /// Page is writable
        const WRITABLE = 1 << 1;
        /// Page is accessible by user mode
        const USER = 1 << 2;
        /// Page write-through caching
        const WRITE_THROUGH = 1 << 3;
        /// Page cache disabled
        const CACHE_DISABLE = 1 << 4;
        /// Page has been accessed
        const ACCESSED = 1 << 5;
        /// Page has been written to
        const DIRTY = 1 << 6;
        /// Page is executable
        const EXECUTABLE = 1 << 7;
        /// Page is global (not flushed on context switch)
        const GLOBAL = 1 << 8;

        /// Present, user-accessible, writable data page
        const USER_DATA = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
    }
}

/// Page table entry
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Entry with nothing mapped
    pub const EMPTY: Self = Self(0);

    /// Build an entry pointing at `frame`
    ///
    /// `frame` must be page-aligned and below 4 GiB.
    fn new(frame: PhysicalAddress, flags: PteFlags) -> Self {
        Self((frame.as_usize() as u32 & FRAME_MASK) | flags.bits())
    }

    /// Check whether the entry maps a frame
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    /// Frame this entry points at
    pub const fn frame(self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 & FRAME_MASK) as usize)
    }

    /// Flags of this entry
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & !FRAME_MASK)
    }

    /// Raw entry value
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Level-2 table covering one megabyte
#[derive(Clone)]
struct L2Table {
    entries: [PageTableEntry; L2_ENTRIES],
    /// Number of present entries
    present: u16,
}

impl L2Table {
    const fn new() -> Self {
        Self {
            entries: [PageTableEntry::EMPTY; L2_ENTRIES],
            present: 0,
        }
    }
}

/// Page table of one address space
pub struct PageTable {
    /// Live level-2 tables keyed by level-1 index
    tables: FnvIndexMap<u16, L2Table, MAX_PAGE_TABLES>,
    /// Runtime limit on live level-2 tables
    max_tables: usize,
}

fn l1_index(va: VirtualAddress) -> u16 {
    (va.as_usize() >> L1_SHIFT) as u16
}

fn l2_index(va: VirtualAddress) -> usize {
    (va.as_usize() >> PAGE_SHIFT) & (L2_ENTRIES - 1)
}

fn translatable(va: VirtualAddress) -> bool {
    (va.as_usize() as u64) < ADDRESS_LIMIT
}

impl PageTable {
    /// Create an empty table allowing at most `max_tables` level-2 tables
    pub fn new(max_tables: usize) -> Self {
        Self {
            tables: FnvIndexMap::new(),
            max_tables: max_tables.min(MAX_PAGE_TABLES),
        }
    }

    /// Present entry for the page containing `va`
    pub fn entry(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        if !translatable(va) {
            return None;
        }
        let table = self.tables.get(&l1_index(va))?;
        table
            .entries
            .get(l2_index(va))
            .copied()
            .filter(|entry| entry.is_present())
    }

    /// Physical address backing `va`, including the page offset
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.entry(va)?;
        let offset = va.as_usize() & (PAGE_SIZE - 1);
        Some(PhysicalAddress::new(entry.frame().as_usize() | offset))
    }

    /// Map the page at `va` to `frame`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if either address is unaligned or `frame` is above 4 GiB
    /// - `OutOfRange` if `va` is not translatable
    /// - `Overlap` if the page is already mapped
    /// - `OutOfMemory` if a level-2 table is needed and none is left
    ///
    /// On error the table is unchanged.
    pub fn map_page(
        &mut self,
        va: VirtualAddress,
        frame: PhysicalAddress,
        flags: PteFlags,
    ) -> MemoryResult<()> {
        if !va.is_page_aligned() || !frame.is_page_aligned() {
            return Err(MemoryError::InvalidArgument);
        }
        if frame.as_usize() as u64 >= ADDRESS_LIMIT {
            return Err(MemoryError::InvalidArgument);
        }
        if !translatable(va) {
            return Err(MemoryError::OutOfRange);
        }

        let l1 = l1_index(va);
        if !self.tables.contains_key(&l1) {
            if self.tables.len() >= self.max_tables {
                return Err(MemoryError::OutOfMemory);
            }
            self.tables
                .insert(l1, L2Table::new())
                .map_err(|_| MemoryError::OutOfMemory)?;
        }
        let table = self.tables.get_mut(&l1).ok_or(MemoryError::OutOfMemory)?;
        let slot = table
            .entries
            .get_mut(l2_index(va))
            .ok_or(MemoryError::OutOfRange)?;
        if slot.is_present() {
            return Err(MemoryError::Overlap);
        }

        *slot = PageTableEntry::new(frame, flags | PteFlags::PRESENT);
        table.present += 1;
        Ok(())
    }

    /// Clear the entry for `va`, returning the frame it pointed at
    ///
    /// A level-2 table left without present entries is released.
    pub fn unmap_page(&mut self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if !translatable(va) {
            return None;
        }
        let l1 = l1_index(va);
        let table = self.tables.get_mut(&l1)?;
        let slot = table.entries.get_mut(l2_index(va))?;
        if !slot.is_present() {
            return None;
        }

        let frame = slot.frame();
        *slot = PageTableEntry::EMPTY;
        table.present -= 1;
        if table.present == 0 {
            self.tables.remove(&l1);
        }
        Some(frame)
    }

    /// Present entries in ascending virtual address order
    pub fn resident_pages(&self) -> impl Iterator<Item = (VirtualAddress, PageTableEntry)> + '_ {
        let mut order: Vec<u16, MAX_PAGE_TABLES> = self.tables.keys().copied().collect();
        order.sort_unstable();

        order.into_iter().flat_map(move |l1| {
            self.tables
                .get(&l1)
                .into_iter()
                .flat_map(move |table| {
                    table
                        .entries
                        .iter()
                        .enumerate()
                        .filter(|(_, entry)| entry.is_present())
                        .map(move |(l2, entry)| {
                            let va = ((l1 as usize) << L1_SHIFT) | (l2 << PAGE_SHIFT);
                            (VirtualAddress::new(va), *entry)
                        })
                })
        })
    }

    /// Number of present entries
    pub fn resident_count(&self) -> usize {
        self.tables.values().map(|table| table.present as usize).sum()
    }

    /// Number of live level-2 tables
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

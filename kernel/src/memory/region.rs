//! Region Table
//!
//! A process's mappings are kept as a bounded list of [`Region`]s, strictly
//! sorted by base address with no two reserved spans overlapping. Every
//! mutation goes through [`RegionTable`], which checks both properties at
//! the point of insertion.
//!
//! # Spans
//!
//! A region's `length` need not be page-aligned. Its reserved span is
//! `[base, round_up(base + length))` and that span is what placement and
//! overlap checks use. Fault containment uses the exact `[base, base + length)`.
//!
//! # Placement
//!
//! [`RegionTable::find_address`] places a new span of a given length:
//! a fixed address is validated and used or rejected, a hint is used when
//! it is free, and otherwise a single left-to-right sweep over the sorted
//! table returns the lowest gap that fits.

#![deny(missing_docs)]

use bitflags::bitflags;
use heapless::Vec;

use super::config::{MapWindow, MAX_REGIONS};
use super::{pages_for, page_round_up, MemoryError, MemoryResult, VirtualAddress, PAGE_SIZE};
use crate::file::FileDescriptor;

/// Longest region a caller can request
///
/// Lengths arrive from signed syscall arguments; anything larger was
/// negative before the cast.
pub const MAX_LENGTH: usize = isize::MAX as usize;

bitflags! {
    /// Flags accepted by `map`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Changes are private to the mapping
        const PRIVATE = 0x1;
        /// Changes are written back to the file on unmap
        const SHARED = 0x2;
        /// Zero-filled memory with no file behind it
        const ANONYMOUS = 0x4;
        /// Place the mapping exactly at the requested address
        const FIXED = 0x8;
    }
}

bitflags! {
    /// Flags accepted by `remap`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RemapFlags: u32 {
        /// The region may move if it cannot grow in place
        const MAYMOVE = 0x1;
    }
}

/// What populates a region's pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Zero-filled on first touch
    Anonymous,
    /// Read from an open file at `page - base`
    File(FileDescriptor),
}

/// Whether modifications reach the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Private copy, never written back
    Private,
    /// Written back to the file on unmap and shrink
    Shared,
}

impl Sharing {
    /// Decode the sharing mode from `map` flags
    ///
    /// Exactly one of `SHARED` and `PRIVATE` must be set.
    pub fn from_flags(flags: MapFlags) -> MemoryResult<Self> {
        match (flags.contains(MapFlags::SHARED), flags.contains(MapFlags::PRIVATE)) {
            (true, false) => Ok(Self::Shared),
            (false, true) => Ok(Self::Private),
            _ => Err(MemoryError::InvalidArgument),
        }
    }
}

/// One mapping in a process address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Page-aligned start address
    pub base: VirtualAddress,
    /// Length in bytes
    pub length: usize,
    /// What populates the pages
    pub backing: Backing,
    /// Whether changes are written back
    pub sharing: Sharing,
    /// Number of resident pages
    pub pages_loaded: usize,
}

impl Region {
    /// Create a region with no resident pages
    pub const fn new(base: VirtualAddress, length: usize, backing: Backing, sharing: Sharing) -> Self {
        Self {
            base,
            length,
            backing,
            sharing,
            pages_loaded: 0,
        }
    }

    /// First address past the region's bytes
    pub const fn end(&self) -> usize {
        self.base.as_usize() + self.length
    }

    /// First address past the region's reserved span
    pub const fn reserved_end(&self) -> usize {
        self.base.as_usize() + self.page_count() * PAGE_SIZE
    }

    /// Number of pages the region spans
    pub const fn page_count(&self) -> usize {
        pages_for(self.length)
    }

    /// Check whether `addr` lies inside the region's bytes
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_usize() >= self.base.as_usize() && addr.as_usize() < self.end()
    }

    /// Check whether the reserved span intersects `[start, end)`
    pub const fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.reserved_end() && self.base.as_usize() < end
    }

    /// Descriptor to write back through, for shared file mappings
    pub const fn write_back_target(&self) -> Option<FileDescriptor> {
        match (self.backing, self.sharing) {
            (Backing::File(fd), Sharing::Shared) => Some(fd),
            _ => None,
        }
    }

    /// Page addresses of the reserved span, ascending
    pub fn pages(&self) -> impl Iterator<Item = VirtualAddress> {
        let base = self.base.as_usize();
        (0..self.page_count()).map(move |i| VirtualAddress::new(base + i * PAGE_SIZE))
    }
}

/// Sorted, overlap-free, bounded list of regions
#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: Vec<Region, MAX_REGIONS>,
    /// Runtime capacity, at most `MAX_REGIONS`
    limit: usize,
}

impl RegionTable {
    /// Create an empty table holding at most `limit` regions
    pub fn new(limit: usize) -> Self {
        Self {
            regions: Vec::new(),
            limit: limit.min(MAX_REGIONS),
        }
    }

    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check whether the table holds no regions
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Maximum number of regions
    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Regions in ascending base order
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Region at `index`
    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    /// Mutable region at `index`
    ///
    /// Callers may change `length` and `pages_loaded` only; `length` must
    /// not grow the reserved span past the next region's base.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.regions.get_mut(index)
    }

    /// Insert `region` at its sorted position, returning its index
    pub fn insert(&mut self, region: Region) -> MemoryResult<usize> {
        if self.regions.len() >= self.limit {
            return Err(MemoryError::CapacityExceeded);
        }

        let index = self.regions.partition_point(|r| r.base < region.base);
        let start = region.base.as_usize();
        let end = region.reserved_end();
        let prev_overlaps = index
            .checked_sub(1)
            .and_then(|i| self.regions.get(i))
            .is_some_and(|prev| prev.overlaps(start, end));
        let next_overlaps = self
            .regions
            .get(index)
            .is_some_and(|next| next.overlaps(start, end));
        if prev_overlaps || next_overlaps {
            return Err(MemoryError::Overlap);
        }

        self.regions
            .insert(index, region)
            .map_err(|_| MemoryError::CapacityExceeded)?;
        Ok(index)
    }

    /// Remove the region whose base is exactly `base`
    pub fn remove(&mut self, base: VirtualAddress) -> MemoryResult<Region> {
        let index = self.index_of(base).ok_or(MemoryError::NotFound)?;
        Ok(self.regions.remove(index))
    }

    /// Index of the region whose base is exactly `base`
    pub fn index_of(&self, base: VirtualAddress) -> Option<usize> {
        self.regions.binary_search_by_key(&base, |r| r.base).ok()
    }

    /// Index of the region whose bytes contain `addr`
    pub fn find_containing(&self, addr: VirtualAddress) -> Option<usize> {
        let index = self.regions.partition_point(|r| r.base <= addr).checked_sub(1)?;
        self.regions
            .get(index)
            .filter(|region| region.contains(addr))
            .map(|_| index)
    }

    /// Base of the region after `index`, if any
    pub fn next_base_after(&self, index: usize) -> Option<VirtualAddress> {
        self.regions.get(index + 1).map(|r| r.base)
    }

    /// Check whether `[start, end)` intersects no reserved span
    pub fn is_free(&self, start: usize, end: usize) -> bool {
        !self.regions.iter().any(|r| r.overlaps(start, end))
    }

    /// Choose a base for a new span of `length` bytes
    ///
    /// With `fixed`, `hint` must be given, page-aligned, in the window and
    /// free. Without it, a usable `hint` is taken as-is and otherwise the
    /// lowest free gap in the window is returned.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a zero length, one above [`MAX_LENGTH`], a
    ///   missing fixed address or a misaligned fixed address
    /// - `OutOfRange` if a fixed span leaves the window or no gap fits
    /// - `Overlap` if a fixed span collides with a region
    pub fn find_address(
        &self,
        window: &MapWindow,
        length: usize,
        hint: Option<VirtualAddress>,
        fixed: bool,
    ) -> MemoryResult<VirtualAddress> {
        if length == 0 || length > MAX_LENGTH {
            return Err(MemoryError::InvalidArgument);
        }
        let span = page_round_up(length).ok_or(MemoryError::OutOfRange)?;

        if fixed {
            let addr = hint.ok_or(MemoryError::InvalidArgument)?;
            if !addr.is_page_aligned() {
                return Err(MemoryError::InvalidArgument);
            }
            let end = addr.as_usize().checked_add(span).ok_or(MemoryError::OutOfRange)?;
            if !window.contains_range(addr.as_usize(), end) {
                return Err(MemoryError::OutOfRange);
            }
            if !self.is_free(addr.as_usize(), end) {
                return Err(MemoryError::Overlap);
            }
            return Ok(addr);
        }

        if let Some(addr) = hint.filter(|addr| addr.is_page_aligned()) {
            let usable = addr
                .as_usize()
                .checked_add(span)
                .is_some_and(|end| window.contains_range(addr.as_usize(), end) && self.is_free(addr.as_usize(), end));
            if usable {
                return Ok(addr);
            }
        }

        let mut candidate = window.low;
        for region in &self.regions {
            if region.reserved_end() <= candidate {
                continue;
            }
            let end = candidate.checked_add(span).ok_or(MemoryError::OutOfRange)?;
            if end <= region.base.as_usize() {
                break;
            }
            candidate = region.reserved_end();
        }

        match candidate.checked_add(span) {
            Some(end) if window.contains_range(candidate, end) => Ok(VirtualAddress::new(candidate)),
            _ => Err(MemoryError::OutOfRange),
        }
    }

    /// Check sort order and disjointness of the whole table
    pub fn is_well_formed(&self) -> bool {
        self.regions
            .windows(2)
            .all(|pair| match pair {
                [a, b] => a.base < b.base && a.reserved_end() <= b.base.as_usize(),
                _ => true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: usize = 0x6000_0000;

    fn anon(base: usize, length: usize) -> Region {
        Region::new(VirtualAddress::new(base), length, Backing::Anonymous, Sharing::Private)
    }

    fn window() -> MapWindow {
        MapWindow::default()
    }

    #[test]
    fn sharing_requires_exactly_one_mode() {
        assert_eq!(Sharing::from_flags(MapFlags::SHARED), Ok(Sharing::Shared));
        assert_eq!(Sharing::from_flags(MapFlags::PRIVATE | MapFlags::ANONYMOUS), Ok(Sharing::Private));
        assert_eq!(
            Sharing::from_flags(MapFlags::SHARED | MapFlags::PRIVATE),
            Err(MemoryError::InvalidArgument)
        );
        assert_eq!(Sharing::from_flags(MapFlags::ANONYMOUS), Err(MemoryError::InvalidArgument));
    }

    #[test]
    fn region_spans() {
        let region = anon(LOW, 5000);
        assert_eq!(region.end(), LOW + 5000);
        assert_eq!(region.reserved_end(), LOW + 8192);
        assert_eq!(region.page_count(), 2);
        assert!(region.contains(VirtualAddress::new(LOW + 4999)));
        assert!(!region.contains(VirtualAddress::new(LOW + 5000)));
        assert!(region.overlaps(LOW + 8191, LOW + 9000));
        assert!(!region.overlaps(LOW + 8192, LOW + 9000));
        assert_eq!(region.pages().count(), 2);
    }

    #[test]
    fn insert_keeps_order() {
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW + 0x4000, 4096)).expect("insert");
        table.insert(anon(LOW, 4096)).expect("insert");
        assert_eq!(table.insert(anon(LOW + 0x2000, 4096)), Ok(1));

        let bases: std::vec::Vec<usize> = table.iter().map(|r| r.base.as_usize()).collect();
        assert_eq!(bases, [LOW, LOW + 0x2000, LOW + 0x4000]);
        assert!(table.is_well_formed());
    }

    #[test]
    fn insert_rejects_overlap_but_accepts_abutting() {
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW + 0x2000, 4096)).expect("insert");

        assert_eq!(table.insert(anon(LOW + 0x1000, 4097)), Err(MemoryError::Overlap));
        assert_eq!(table.insert(anon(LOW + 0x2000, 1)), Err(MemoryError::Overlap));
        assert_eq!(table.insert(anon(LOW + 0x1000, 4096)), Ok(0));
        assert_eq!(table.insert(anon(LOW + 0x3000, 4096)), Ok(2));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = RegionTable::new(2);
        table.insert(anon(LOW, 4096)).expect("insert");
        table.insert(anon(LOW + 0x1000, 4096)).expect("insert");
        assert_eq!(table.insert(anon(LOW + 0x2000, 4096)), Err(MemoryError::CapacityExceeded));

        table.remove(VirtualAddress::new(LOW)).expect("remove");
        assert!(table.insert(anon(LOW + 0x2000, 4096)).is_ok());
    }

    #[test]
    fn remove_by_exact_base() {
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW, 8192)).expect("insert");
        assert_eq!(table.remove(VirtualAddress::new(LOW + 0x1000)), Err(MemoryError::NotFound));
        assert_eq!(table.remove(VirtualAddress::new(LOW)).map(|r| r.length), Ok(8192));
        assert_eq!(table.remove(VirtualAddress::new(LOW)), Err(MemoryError::NotFound));
        assert!(table.is_empty());
    }

    #[test]
    fn find_containing_uses_exact_length() {
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW, 100)).expect("insert");
        table.insert(anon(LOW + 0x3000, 8192)).expect("insert");

        assert_eq!(table.find_containing(VirtualAddress::new(LOW + 10)), Some(0));
        assert_eq!(table.find_containing(VirtualAddress::new(LOW + 100)), None);
        assert_eq!(table.find_containing(VirtualAddress::new(LOW + 0x4fff)), Some(1));
        assert_eq!(table.find_containing(VirtualAddress::new(LOW + 0x5000)), None);
        assert_eq!(table.find_containing(VirtualAddress::new(LOW - 1)), None);
    }

    #[test]
    fn sweep_returns_lowest_gap() {
        let mut table = RegionTable::new(MAX_REGIONS);
        assert_eq!(
            table.find_address(&window(), 8192, None, false),
            Ok(VirtualAddress::new(LOW))
        );

        table.insert(anon(LOW, 8192)).expect("insert");
        table.insert(anon(LOW + 0x3000, 100)).expect("insert");
        assert_eq!(
            table.find_address(&window(), 4096, None, false),
            Ok(VirtualAddress::new(LOW + 0x2000))
        );
        assert_eq!(
            table.find_address(&window(), 4097, None, false),
            Ok(VirtualAddress::new(LOW + 0x4000))
        );
    }

    #[test]
    fn usable_hint_is_honored() {
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW, 4096)).expect("insert");

        let hint = VirtualAddress::new(LOW + 0x10_0000);
        assert_eq!(table.find_address(&window(), 4096, Some(hint), false), Ok(hint));
        // Colliding or misaligned hints fall back to the sweep
        assert_eq!(
            table.find_address(&window(), 4096, Some(VirtualAddress::new(LOW)), false),
            Ok(VirtualAddress::new(LOW + 0x1000))
        );
        assert_eq!(
            table.find_address(&window(), 4096, Some(VirtualAddress::new(LOW + 0x10)), false),
            Ok(VirtualAddress::new(LOW + 0x1000))
        );
    }

    #[test]
    fn fixed_placement_checks() {
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW + 0x2000, 4096)).expect("insert");
        let w = window();

        assert_eq!(table.find_address(&w, 4096, None, true), Err(MemoryError::InvalidArgument));
        assert_eq!(
            table.find_address(&w, 4096, Some(VirtualAddress::new(LOW + 1)), true),
            Err(MemoryError::InvalidArgument)
        );
        assert_eq!(
            table.find_address(&w, 4096, Some(VirtualAddress::new(LOW - 0x1000)), true),
            Err(MemoryError::OutOfRange)
        );
        assert_eq!(
            table.find_address(&w, 8192, Some(VirtualAddress::new(w.high - 0x1000)), true),
            Err(MemoryError::OutOfRange)
        );
        assert_eq!(
            table.find_address(&w, 4097, Some(VirtualAddress::new(LOW + 0x1000)), true),
            Err(MemoryError::Overlap)
        );
        // Ends exactly where the existing region begins
        assert_eq!(
            table.find_address(&w, 4096, Some(VirtualAddress::new(LOW + 0x1000)), true),
            Ok(VirtualAddress::new(LOW + 0x1000))
        );
        // Starts exactly where the existing region ends
        assert_eq!(
            table.find_address(&w, 4096, Some(VirtualAddress::new(LOW + 0x3000)), true),
            Ok(VirtualAddress::new(LOW + 0x3000))
        );
    }

    #[test]
    fn sweep_fails_when_window_is_full() {
        let small = MapWindow::new(LOW, LOW + 0x3000);
        let mut table = RegionTable::new(MAX_REGIONS);
        table.insert(anon(LOW + 0x1000, 4096)).expect("insert");

        assert_eq!(
            table.find_address(&small, 4096, None, false),
            Ok(VirtualAddress::new(LOW))
        );
        assert_eq!(
            table.find_address(&small, 8192, None, false),
            Err(MemoryError::OutOfRange)
        );
        assert_eq!(table.find_address(&small, 0, None, false), Err(MemoryError::InvalidArgument));
    }

    #[test]
    fn negative_lengths_are_invalid() {
        let table = RegionTable::new(MAX_REGIONS);
        let w = window();
        let minus_one = (-1isize) as usize;

        assert_eq!(table.find_address(&w, minus_one, None, false), Err(MemoryError::InvalidArgument));
        assert_eq!(
            table.find_address(&w, MAX_LENGTH + 1, Some(VirtualAddress::new(LOW)), true),
            Err(MemoryError::InvalidArgument)
        );
        // Positive but too large for the window
        assert_eq!(table.find_address(&w, MAX_LENGTH, None, false), Err(MemoryError::OutOfRange));
    }
}

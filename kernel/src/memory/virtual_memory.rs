//! Address Space
//!
//! This module ties the region table and the page table of one process
//! together and implements the mapping operations on top of them.
//!
//! # Features
//!
//! - Region placement (fixed, hinted or swept)
//! - Lazy population, one page per fault
//! - Whole-region unmap with write-back of shared file mappings
//! - Shrink, in-place growth and relocation of live regions
//! - Read-only snapshots of regions and resident pages
//!
//! # Fault Resolution
//!
//! A fault is handled in three steps so that file I/O can run without the
//! address space locked:
//!
//! ```text
//! plan_fault   (locked)    region lookup, decide what the page needs
//! PageFill     (unlocked)  read file contents, allocate and fill a frame
//! commit_fault (locked)    re-validate the region, install the entry
//! ```
//!
//! [`AddressSpace::resolve_fault`] runs the three steps back to back for
//! callers that already hold exclusive access.
//!
//! # Failure Atomicity
//!
//! Every operation either completes or leaves the region table, the page
//! table and the frame pool as they were. Frames allocated on a failing
//! path are returned before the error is.

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use super::config::MmapConfig;
use super::introspection::{
    MappingInfo, MappingSnapshot, ResidentPage, ResidentPageSnapshot, MAX_UPAGE_INFO,
    MAX_WMMAP_INFO,
};
use super::page_table::{PageTable, PteFlags};
use super::region::{Backing, MapFlags, Region, RegionTable, Sharing, MAX_LENGTH};
use super::{
    page_round_up, FrameAllocator, MemoryError, MemoryResult, Page, PhysicalAddress,
    VirtualAddress, PAGE_SIZE,
};
use crate::debug_print;
use crate::file::{FileDescriptor, FileTable};

/// Address space statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceStats {
    /// Regions created by `map`
    pub regions_mapped: u64,
    /// Regions removed by `unmap`
    pub regions_unmapped: u64,
    /// Faults that installed or found a page
    pub faults_resolved: u64,
    /// Faults outside every region
    pub faults_rejected: u64,
    /// Page-table entries installed by faults
    pub pages_installed: u64,
    /// Frames released by unmap and shrink
    pub pages_released: u64,
    /// Regions moved by `remap`
    pub relocations: u64,
    /// Pages written back to files
    pub write_backs: u64,
}

/// Outcome of a page fault that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page is now resident
    Resolved,
    /// No region contains the address
    NotOurs,
}

/// What a faulting address needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPlan {
    /// No region contains the address
    NotOurs,
    /// The page is already mapped
    Resident,
    /// A frame must be filled and installed
    Fill(PageFill),
}

/// Work order for populating one page
///
/// Carries the region fields the fill needs so that it can run with the
/// address space unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFill {
    /// Page-aligned faulting address
    pub page: VirtualAddress,
    /// Base of the region the page belongs to
    pub region_base: VirtualAddress,
    /// Backing of that region
    pub backing: Backing,
    /// File offset of the page
    pub file_offset: usize,
    /// Bytes of the region inside this page
    pub file_bytes: usize,
}

impl PageFill {
    /// Check whether the fill reads from a file
    pub const fn reads_file(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Produce the page contents into `contents`
    ///
    /// The page is zeroed first, so bytes past a short read stay zero.
    pub fn load<F: FileTable>(&self, files: &mut F, contents: &mut Page) -> MemoryResult<()> {
        contents.fill(0);
        if let Backing::File(fd) = self.backing {
            let buf = contents
                .get_mut(..self.file_bytes)
                .ok_or(MemoryError::InvalidArgument)?;
            let read = files.read_at(fd, buf, self.file_offset)?;
            debug_print!(
                TRACE,
                "Read {} of {} bytes at offset {:#x} for page {:#x}",
                read,
                self.file_bytes,
                self.file_offset,
                self.page
            );
        }
        Ok(())
    }
}

/// Result of committing a filled frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The frame now backs the page
    Installed,
    /// Another context installed the page first; the frame was not used
    AlreadyResident,
    /// The region moved, shrank or vanished; the frame was not used
    RegionGone,
}

/// Allocate a frame and copy `contents` into it
pub fn alloc_filled<A: FrameAllocator>(
    frames: &mut A,
    contents: &Page,
) -> MemoryResult<PhysicalAddress> {
    let frame = frames.alloc_frame().ok_or(MemoryError::OutOfMemory)?;
    match frames.frame_mut(frame) {
        Some(page) => {
            page.copy_from_slice(contents);
            Ok(frame)
        }
        None => {
            frames.free_frame(frame);
            Err(MemoryError::OutOfMemory)
        }
    }
}

/// Turn a commit outcome into a fault result, returning unused frames
pub fn finish_fault<A: FrameAllocator>(
    outcome: MemoryResult<CommitOutcome>,
    frame: PhysicalAddress,
    frames: &mut A,
) -> MemoryResult<FaultResolution> {
    match outcome {
        Ok(CommitOutcome::Installed) => Ok(FaultResolution::Resolved),
        Ok(CommitOutcome::AlreadyResident) => {
            frames.free_frame(frame);
            Ok(FaultResolution::Resolved)
        }
        Ok(CommitOutcome::RegionGone) => {
            frames.free_frame(frame);
            Ok(FaultResolution::NotOurs)
        }
        Err(error) => {
            frames.free_frame(frame);
            Err(error)
        }
    }
}

/// Mapping state of one process
pub struct AddressSpace {
    /// Regions, sorted and disjoint
    regions: RegionTable,
    /// Translations of resident pages
    page_table: PageTable,
    /// Limits this address space was created with
    config: MmapConfig,
    /// Address space statistics
    stats: AddressSpaceStats,
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new(config: MmapConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self {
            regions: RegionTable::new(config.max_regions),
            page_table: PageTable::new(config.max_page_tables),
            config,
            stats: AddressSpaceStats::default(),
        })
    }

    /// Region table
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Page table
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Configuration
    pub fn config(&self) -> &MmapConfig {
        &self.config
    }

    /// Statistics
    pub fn stats(&self) -> AddressSpaceStats {
        self.stats
    }

    /// Reserve a new region and return its base
    ///
    /// Without `FIXED`, `addr` is a hint that is used when free. Anonymous
    /// mappings ignore `fd`; file mappings need `fd` open in `files`.
    pub fn map<F: FileTable>(
        &mut self,
        addr: VirtualAddress,
        length: usize,
        flags: MapFlags,
        fd: Option<FileDescriptor>,
        files: &F,
    ) -> MemoryResult<VirtualAddress> {
        if length == 0 || length > MAX_LENGTH {
            return Err(MemoryError::InvalidArgument);
        }
        let sharing = Sharing::from_flags(flags)?;
        let backing = if flags.contains(MapFlags::ANONYMOUS) {
            Backing::Anonymous
        } else {
            match fd {
                Some(fd) if files.is_open(fd) => Backing::File(fd),
                _ => return Err(MemoryError::InvalidArgument),
            }
        };
        if self.regions.len() >= self.regions.capacity() {
            return Err(MemoryError::CapacityExceeded);
        }

        let base = self.regions.find_address(
            &self.config.window,
            length,
            Some(addr),
            flags.contains(MapFlags::FIXED),
        )?;
        self.regions.insert(Region::new(base, length, backing, sharing))?;
        self.stats.regions_mapped += 1;

        debug_print!(
            DEBUG,
            "Mapped {:#x}..{:#x} ({:?}, {:?})",
            base,
            base.as_usize() + length,
            backing,
            sharing
        );
        Ok(base)
    }

    /// Decide what a fault at `addr` needs
    pub fn plan_fault(&mut self, addr: VirtualAddress) -> FaultPlan {
        let Some(region) = self
            .regions
            .find_containing(addr)
            .and_then(|index| self.regions.get(index))
        else {
            self.stats.faults_rejected += 1;
            return FaultPlan::NotOurs;
        };

        let page = addr.align_down();
        if self.page_table.entry(page).is_some() {
            self.stats.faults_resolved += 1;
            return FaultPlan::Resident;
        }

        let file_offset = page.offset_from(region.base);
        FaultPlan::Fill(PageFill {
            page,
            region_base: region.base,
            backing: region.backing,
            file_offset,
            file_bytes: (region.length - file_offset).min(PAGE_SIZE),
        })
    }

    /// Install a filled `frame` for `fill`
    ///
    /// The region is looked up again; if it no longer holds the page the
    /// frame is left to the caller. On `Err` the frame is also the caller's.
    pub fn commit_fault(
        &mut self,
        fill: &PageFill,
        frame: PhysicalAddress,
    ) -> MemoryResult<CommitOutcome> {
        let Some(index) = self.regions.find_containing(fill.page).filter(|&index| {
            self.regions
                .get(index)
                .is_some_and(|r| r.base == fill.region_base && r.backing == fill.backing)
        }) else {
            self.stats.faults_rejected += 1;
            debug_print!(DEBUG, "Region for page {:#x} changed during fill", fill.page);
            return Ok(CommitOutcome::RegionGone);
        };

        if self.page_table.entry(fill.page).is_some() {
            self.stats.faults_resolved += 1;
            return Ok(CommitOutcome::AlreadyResident);
        }

        self.page_table.map_page(fill.page, frame, PteFlags::USER_DATA)?;
        if let Some(region) = self.regions.get_mut(index) {
            region.pages_loaded += 1;
        }
        self.stats.faults_resolved += 1;
        self.stats.pages_installed += 1;

        debug_print!(TRACE, "Installed {:#x} -> {:#x}", fill.page, frame);
        Ok(CommitOutcome::Installed)
    }

    /// Resolve a fault at `addr` with exclusive access to everything
    ///
    /// Allocates at most one frame.
    pub fn resolve_fault<A: FrameAllocator, F: FileTable>(
        &mut self,
        addr: VirtualAddress,
        frames: &mut A,
        files: &mut F,
    ) -> MemoryResult<FaultResolution> {
        let fill = match self.plan_fault(addr) {
            FaultPlan::NotOurs => return Ok(FaultResolution::NotOurs),
            FaultPlan::Resident => return Ok(FaultResolution::Resolved),
            FaultPlan::Fill(fill) => fill,
        };

        let mut contents = [0u8; PAGE_SIZE];
        fill.load(files, &mut contents)?;
        let frame = alloc_filled(frames, &contents)?;
        let outcome = self.commit_fault(&fill, frame);
        finish_fault(outcome, frame, frames)
    }

    /// Remove the region based exactly at `addr`
    ///
    /// Shared file regions are written back first, all `length` bytes from
    /// file offset 0, with pages that were never faulted in taken from the
    /// file itself. A read or write failure leaves the region mapped and
    /// untouched. Sub-range unmap is not supported.
    ///
    /// The caller keeps the address space locked across the file I/O. A
    /// failed write-back then has nothing to undo, and no fault or remap can
    /// change the region between the write-back and the teardown.
    pub fn unmap<A: FrameAllocator, F: FileTable>(
        &mut self,
        addr: VirtualAddress,
        frames: &mut A,
        files: &mut F,
    ) -> MemoryResult<()> {
        let region = self
            .regions
            .index_of(addr)
            .and_then(|index| self.regions.get(index))
            .copied()
            .ok_or(MemoryError::NotFound)?;

        if let Some(fd) = region.write_back_target() {
            self.write_back(&region, fd, region.base.as_usize(), true, frames, files)?;
        }
        let released = self.release_pages(&region, region.base.as_usize(), frames);
        self.regions.remove(region.base)?;
        self.stats.regions_unmapped += 1;

        debug_print!(
            DEBUG,
            "Unmapped {:#x}..{:#x}, released {} pages",
            region.base,
            region.end(),
            released
        );
        Ok(())
    }

    /// Change the length of the region based at `old`
    ///
    /// Returns the region's base afterwards, which differs from `old` only
    /// when the region was relocated.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a misaligned `old`, a zero or negative
    ///   `new_size`, or an `old_size` that is not the region's length
    /// - `NotFound` if no region is based at `old`
    /// - `OutOfRange` if growth would pass the window's high bound
    /// - `Overlap` if growth collides and moving is not allowed
    /// - `Io` if shrinking a shared file region fails to write back
    pub fn remap<A: FrameAllocator, F: FileTable>(
        &mut self,
        old: VirtualAddress,
        old_size: usize,
        new_size: usize,
        may_move: bool,
        frames: &mut A,
        files: &mut F,
    ) -> MemoryResult<VirtualAddress> {
        if !old.is_page_aligned() || new_size == 0 || new_size > MAX_LENGTH {
            return Err(MemoryError::InvalidArgument);
        }
        let index = self.regions.index_of(old).ok_or(MemoryError::NotFound)?;
        let region = self
            .regions
            .get(index)
            .copied()
            .ok_or(MemoryError::NotFound)?;
        if region.length != old_size {
            return Err(MemoryError::InvalidArgument);
        }

        if new_size == old_size {
            return Ok(old);
        }
        if new_size < old_size {
            self.shrink(index, &region, new_size, frames, files)?;
            return Ok(old);
        }

        let new_end = page_round_up(new_size)
            .and_then(|span| old.as_usize().checked_add(span))
            .ok_or(MemoryError::OutOfRange)?;
        if new_end > self.config.window.high {
            return Err(MemoryError::OutOfRange);
        }

        let fits = self
            .regions
            .next_base_after(index)
            .is_none_or(|next| new_end <= next.as_usize());
        if fits {
            if let Some(r) = self.regions.get_mut(index) {
                r.length = new_size;
            }
            debug_print!(DEBUG, "Grew {:#x} in place to {} bytes", old, new_size);
            return Ok(old);
        }

        if !may_move {
            debug_print!(WARNING, "Cannot grow {:#x} in place and moving is not allowed", old);
            return Err(MemoryError::Overlap);
        }
        self.relocate(&region, new_size)
    }

    /// Shrink the region at `index` to `new_size` bytes
    fn shrink<A: FrameAllocator, F: FileTable>(
        &mut self,
        index: usize,
        region: &Region,
        new_size: usize,
        frames: &mut A,
        files: &mut F,
    ) -> MemoryResult<()> {
        let tail = page_round_up(region.base.as_usize() + new_size).ok_or(MemoryError::OutOfRange)?;
        if let Some(fd) = region.write_back_target() {
            self.write_back(region, fd, tail, false, frames, files)?;
        }

        let released = self.release_pages(region, tail, frames);
        if let Some(r) = self.regions.get_mut(index) {
            r.length = new_size;
            r.pages_loaded = r.pages_loaded.saturating_sub(released);
        }
        debug_print!(
            DEBUG,
            "Shrank {:#x} to {} bytes, released {} pages",
            region.base,
            new_size,
            released
        );
        Ok(())
    }

    /// Move `region` to a fresh span of `new_size` bytes
    ///
    /// Resident frames are re-pointed, never copied.
    fn relocate(&mut self, region: &Region, new_size: usize) -> MemoryResult<VirtualAddress> {
        let target = self
            .regions
            .find_address(&self.config.window, new_size, None, false)?;
        let moved = Region {
            base: target,
            length: new_size,
            ..*region
        };

        self.regions.remove(region.base)?;
        if let Err(error) = self.regions.insert(moved) {
            self.regions.insert(*region)?;
            return Err(error);
        }
        if let Err(error) = self.move_pages(region, target) {
            self.regions.remove(target)?;
            self.regions.insert(*region)?;
            debug_print!(WARNING, "Relocation of {:#x} failed: {}", region.base, error);
            return Err(error);
        }

        self.stats.relocations += 1;
        debug_print!(
            DEBUG,
            "Relocated {:#x} to {:#x} ({} bytes)",
            region.base,
            target,
            new_size
        );
        Ok(target)
    }

    /// Re-point every resident page of `region` to the same offset at `target`
    fn move_pages(&mut self, region: &Region, target: VirtualAddress) -> MemoryResult<()> {
        let shifted = |va: VirtualAddress| {
            VirtualAddress::new(target.as_usize() + va.offset_from(region.base))
        };

        for (done, va) in region.pages().enumerate() {
            let Some(entry) = self.page_table.entry(va) else {
                continue;
            };
            if let Err(error) = self.page_table.map_page(shifted(va), entry.frame(), entry.flags()) {
                for undo in region.pages().take(done) {
                    if self.page_table.entry(undo).is_some() {
                        self.page_table.unmap_page(shifted(undo));
                    }
                }
                return Err(error);
            }
        }

        for va in region.pages() {
            self.page_table.unmap_page(va);
        }
        Ok(())
    }

    /// Write pages of `region` at or above `from` back to `fd`
    ///
    /// Resident pages are written from their frames. With `fill_holes`,
    /// pages never faulted in are written too, from the file's current
    /// contents, so the file ends up holding all of the region's bytes.
    fn write_back<A: FrameAllocator, F: FileTable>(
        &mut self,
        region: &Region,
        fd: FileDescriptor,
        from: usize,
        fill_holes: bool,
        frames: &A,
        files: &mut F,
    ) -> MemoryResult<()> {
        let end = region.end();
        let mut scratch = [0u8; PAGE_SIZE];
        for va in region.pages().filter(|va| va.as_usize() >= from) {
            let offset = va.offset_from(region.base);
            let bytes = (end - va.as_usize()).min(PAGE_SIZE);
            let data: &[u8] = match self.page_table.entry(va) {
                Some(entry) => frames
                    .frame(entry.frame())
                    .ok_or(MemoryError::OutOfRange)?
                    .get(..bytes)
                    .ok_or(MemoryError::InvalidArgument)?,
                None if fill_holes => {
                    scratch.fill(0);
                    let buf = scratch.get_mut(..bytes).ok_or(MemoryError::InvalidArgument)?;
                    files.read_at(fd, buf, offset).inspect_err(|error| {
                        debug_print!(WARNING, "Write-back read of {:#x} from {:?} failed: {}", va, fd, error);
                    })?;
                    buf
                }
                None => continue,
            };

            if let Err(error) = files.write_at(fd, data, offset) {
                debug_print!(WARNING, "Write-back of {:#x} to {:?} failed: {}", va, fd, error);
                return Err(error.into());
            }
            self.stats.write_backs += 1;
        }
        Ok(())
    }

    /// Clear and free resident pages of `region` at or above `from`
    fn release_pages<A: FrameAllocator>(
        &mut self,
        region: &Region,
        from: usize,
        frames: &mut A,
    ) -> usize {
        let mut released = 0;
        for va in region.pages().filter(|va| va.as_usize() >= from) {
            if let Some(frame) = self.page_table.unmap_page(va) {
                frames.free_frame(frame);
                released += 1;
            }
        }
        self.stats.pages_released += released as u64;
        released
    }

    /// Snapshot of the regions in ascending base order
    pub fn describe_regions(&self) -> MappingSnapshot {
        let mut snapshot = MappingSnapshot {
            total_mmaps: self.regions.len(),
            ..MappingSnapshot::default()
        };
        for region in self.regions.iter().take(MAX_WMMAP_INFO) {
            let _ = snapshot.mappings.push(MappingInfo {
                base: region.base,
                length: region.length,
                pages_loaded: region.pages_loaded,
            });
        }
        snapshot
    }

    /// Snapshot of resident user pages, at most [`MAX_UPAGE_INFO`]
    pub fn describe_resident_pages(&self) -> ResidentPageSnapshot {
        let mut snapshot = ResidentPageSnapshot::default();
        let user_pages = self
            .page_table
            .resident_pages()
            .filter(|(_, entry)| entry.flags().contains(PteFlags::USER))
            .take(MAX_UPAGE_INFO);
        for (va, entry) in user_pages {
            let _ = snapshot.pages.push(ResidentPage {
                virtual_address: va,
                physical_address: entry.frame(),
            });
        }
        snapshot.n_upages = snapshot.pages.len();
        snapshot
    }
}

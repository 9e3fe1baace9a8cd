//! Mapping Snapshots
//!
//! Point-in-time, read-only views of an address space for diagnostics.
//! Both snapshots are bounded and serialize with `serde`, so the syscall
//! layer can copy them out to a user buffer.

#![deny(missing_docs)]

use heapless::Vec;
use serde::Serialize;

use super::{PhysicalAddress, VirtualAddress};

/// Maximum number of region records in a [`MappingSnapshot`]
pub const MAX_WMMAP_INFO: usize = 16;

/// Maximum number of page records in a [`ResidentPageSnapshot`]
pub const MAX_UPAGE_INFO: usize = 32;

/// One region as reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MappingInfo {
    /// Region base address
    pub base: VirtualAddress,
    /// Region length in bytes
    pub length: usize,
    /// Resident pages
    pub pages_loaded: usize,
}

/// Regions of an address space in ascending base order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingSnapshot {
    /// Number of regions in the address space
    pub total_mmaps: usize,
    /// First [`MAX_WMMAP_INFO`] regions
    pub mappings: Vec<MappingInfo, MAX_WMMAP_INFO>,
}

/// One resident user page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResidentPage {
    /// Page address
    pub virtual_address: VirtualAddress,
    /// Frame backing the page
    pub physical_address: PhysicalAddress,
}

/// Resident user pages in ascending address order, capped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResidentPageSnapshot {
    /// Number of records in `pages`
    pub n_upages: usize,
    /// First [`MAX_UPAGE_INFO`] resident pages
    pub pages: Vec<ResidentPage, MAX_UPAGE_INFO>,
}

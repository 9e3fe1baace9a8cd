//! Mapping Subsystem Configuration
//!
//! Compile-time capacities and the runtime-tunable limits of an address
//! space. The runtime limits may only lower the compile-time capacities,
//! which size the bounded containers.

#![deny(missing_docs)]

use static_assertions::const_assert;

use super::{MemoryError, MemoryResult, PAGE_SIZE};

/// Maximum number of regions a process can hold
pub const MAX_REGIONS: usize = 16;

/// Maximum number of level-2 page tables per address space
pub const MAX_PAGE_TABLES: usize = 64;

/// Default low bound of the mapping window
pub const DEFAULT_WINDOW_LOW: usize = 0x6000_0000;

/// Default high bound of the mapping window (exclusive)
pub const DEFAULT_WINDOW_HIGH: usize = 0x8000_0000;

/// Highest address a two-level 32-bit table can translate, exclusive
pub const ADDRESS_LIMIT: u64 = 1 << 32;

const_assert!(DEFAULT_WINDOW_LOW % PAGE_SIZE == 0);
const_assert!(DEFAULT_WINDOW_HIGH % PAGE_SIZE == 0);
const_assert!(DEFAULT_WINDOW_LOW < DEFAULT_WINDOW_HIGH);
// FnvIndexMap capacity must be a power of two
const_assert!(MAX_PAGE_TABLES.is_power_of_two());

/// Virtual range `[low, high)` reserved for mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapWindow {
    /// Lowest usable address
    pub low: usize,
    /// First address past the window
    pub high: usize,
}

impl MapWindow {
    /// Create a window without validating it
    pub const fn new(low: usize, high: usize) -> Self {
        Self { low, high }
    }

    /// Check bounds are aligned, ordered and translatable
    pub fn validate(&self) -> MemoryResult<()> {
        if self.low % PAGE_SIZE != 0 || self.high % PAGE_SIZE != 0 || self.low >= self.high {
            return Err(MemoryError::InvalidArgument);
        }
        if self.high as u64 > ADDRESS_LIMIT {
            return Err(MemoryError::OutOfRange);
        }
        Ok(())
    }

    /// Check whether `[start, end)` lies entirely inside the window
    pub const fn contains_range(&self, start: usize, end: usize) -> bool {
        start >= self.low && start <= end && end <= self.high
    }

    /// Size of the window in bytes
    pub const fn size(&self) -> usize {
        self.high - self.low
    }
}

impl Default for MapWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LOW, DEFAULT_WINDOW_HIGH)
    }
}

/// Limits applied to one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapConfig {
    /// Window regions are placed in
    pub window: MapWindow,
    /// Region table capacity, at most [`MAX_REGIONS`]
    pub max_regions: usize,
    /// Level-2 page table budget, at most [`MAX_PAGE_TABLES`]
    pub max_page_tables: usize,
}

impl MmapConfig {
    /// Default configuration
    pub const DEFAULT: Self = Self {
        window: MapWindow::new(DEFAULT_WINDOW_LOW, DEFAULT_WINDOW_HIGH),
        max_regions: MAX_REGIONS,
        max_page_tables: MAX_PAGE_TABLES,
    };

    /// Replace the mapping window
    pub const fn with_window(mut self, window: MapWindow) -> Self {
        self.window = window;
        self
    }

    /// Replace the region capacity
    pub const fn with_max_regions(mut self, max_regions: usize) -> Self {
        self.max_regions = max_regions;
        self
    }

    /// Replace the page-table budget
    pub const fn with_max_page_tables(mut self, max_page_tables: usize) -> Self {
        self.max_page_tables = max_page_tables;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> MemoryResult<()> {
        self.window.validate()?;
        if self.max_regions == 0 || self.max_regions > MAX_REGIONS {
            return Err(MemoryError::InvalidArgument);
        }
        if self.max_page_tables == 0 || self.max_page_tables > MAX_PAGE_TABLES {
            return Err(MemoryError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

//! Open-File Interface
//!
//! The mapping subsystem reads file-backed pages on fault and writes shared
//! pages back on unmap and shrink. It does so through the [`FileTable`]
//! trait, which the file-descriptor subsystem implements for each process.
//!
//! # Ownership
//!
//! A [`FileDescriptor`] stored in a region is a non-owning reference. The
//! mapping code never opens or closes descriptors; the descriptor's lifetime
//! is managed by whoever owns the file table.

#![deny(missing_docs)]

use core::fmt;
use thiserror_no_std::Error;

/// Per-process open-file descriptor number
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FileDescriptor(u32);

impl FileDescriptor {
    /// Create a descriptor from its raw number
    pub const fn new(fd: u32) -> Self {
        Self(fd)
    }

    /// Get the raw descriptor number
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// File operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FileError {
    /// Descriptor is not open in this process
    #[error("bad file descriptor")]
    BadDescriptor,
    /// Read from the underlying file failed
    #[error("read failed")]
    ReadFailed,
    /// Write to the underlying file failed
    #[error("write failed")]
    WriteFailed,
}

/// Result type for file operations
pub type FileResult<T> = Result<T, FileError>;

/// Positional access to a process's open files
pub trait FileTable {
    /// Check whether `fd` refers to an open file
    fn is_open(&self, fd: FileDescriptor) -> bool;

    /// Read up to `buf.len()` bytes at `offset`
    ///
    /// Returns the number of bytes read; fewer than requested at end of file.
    fn read_at(&mut self, fd: FileDescriptor, buf: &mut [u8], offset: usize) -> FileResult<usize>;

    /// Write all of `buf` at `offset`
    fn write_at(&mut self, fd: FileDescriptor, buf: &[u8], offset: usize) -> FileResult<()>;
}

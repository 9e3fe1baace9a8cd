//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use wmap::file::{FileDescriptor, FileError, FileResult, FileTable};
use wmap::memory::{FramePool, MapWindow, MmapConfig, Page, PhysicalAddress, PAGE_SIZE};

/// Physical address the test frame pools start at
pub const POOL_BASE: PhysicalAddress = PhysicalAddress::new(0x4000_0000);

/// Low bound of the default mapping window
pub const LOW: usize = 0x6000_0000;

/// Byte the pool memory is poisoned with, to catch missing zero-fill
pub const POISON: u8 = 0xA5;

/// Backing memory for a frame pool of `frames` poisoned pages
pub fn page_memory(frames: usize) -> Vec<Page> {
    vec![[POISON; PAGE_SIZE]; frames]
}

/// Frame pool over `memory`
pub fn frame_pool(memory: &mut [Page]) -> FramePool<'_> {
    FramePool::new(POOL_BASE, memory).expect("frame pool")
}

/// Configuration with a window of `pages` pages starting at [`LOW`]
pub fn small_window(pages: usize) -> MmapConfig {
    MmapConfig::DEFAULT.with_window(MapWindow::new(LOW, LOW + pages * PAGE_SIZE))
}

/// One write seen by [`MemFileTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub fd: FileDescriptor,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Default)]
struct MemFile {
    data: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory open-file table with failure injection and a write log
#[derive(Debug, Default)]
pub struct MemFileTable {
    files: BTreeMap<u32, MemFile>,
    writes: Vec<WriteRecord>,
    reads: usize,
}

impl MemFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file holding `data` as descriptor `fd`
    pub fn open(&mut self, fd: u32, data: Vec<u8>) -> FileDescriptor {
        self.files.insert(
            fd,
            MemFile {
                data,
                ..MemFile::default()
            },
        );
        FileDescriptor::new(fd)
    }

    pub fn close(&mut self, fd: FileDescriptor) {
        self.files.remove(&fd.as_u32());
    }

    pub fn contents(&self, fd: FileDescriptor) -> &[u8] {
        self.files
            .get(&fd.as_u32())
            .map(|file| file.data.as_slice())
            .unwrap_or_default()
    }

    pub fn set_fail_reads(&mut self, fd: FileDescriptor, fail: bool) {
        if let Some(file) = self.files.get_mut(&fd.as_u32()) {
            file.fail_reads = fail;
        }
    }

    pub fn set_fail_writes(&mut self, fd: FileDescriptor, fail: bool) {
        if let Some(file) = self.files.get_mut(&fd.as_u32()) {
            file.fail_writes = fail;
        }
    }

    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl FileTable for MemFileTable {
    fn is_open(&self, fd: FileDescriptor) -> bool {
        self.files.contains_key(&fd.as_u32())
    }

    fn read_at(&mut self, fd: FileDescriptor, buf: &mut [u8], offset: usize) -> FileResult<usize> {
        let file = self.files.get(&fd.as_u32()).ok_or(FileError::BadDescriptor)?;
        if file.fail_reads {
            return Err(FileError::ReadFailed);
        }
        self.reads += 1;
        let available = file.data.get(offset..).unwrap_or_default();
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn write_at(&mut self, fd: FileDescriptor, buf: &[u8], offset: usize) -> FileResult<()> {
        let file = self.files.get_mut(&fd.as_u32()).ok_or(FileError::BadDescriptor)?;
        if file.fail_writes {
            return Err(FileError::WriteFailed);
        }
        let end = offset + buf.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[offset..end].copy_from_slice(buf);
        self.writes.push(WriteRecord {
            fd,
            offset,
            len: buf.len(),
        });
        Ok(())
    }
}

/// `len` bytes of a recognizable pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

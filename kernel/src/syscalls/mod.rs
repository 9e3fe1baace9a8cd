//! System Call Interface
//!
//! This module decodes the mapping system calls and dispatches them to the
//! calling process's memory context.
//!
//! # System Calls
//!
//! | Number | Call           | Arguments                                  | Returns        |
//! |--------|----------------|--------------------------------------------|----------------|
//! | 22     | `wmap`         | addr, length, flags, fd                    | base address   |
//! | 23     | `wunmap`       | addr                                       | 0              |
//! | 24     | `wremap`       | old addr, old size, new size, flags        | base address   |
//! | 25     | `getpgdirinfo` | (output buffer)                            | bytes written  |
//! | 26     | `getwmapinfo`  | (output buffer)                            | bytes written  |
//!
//! The two info calls serialize their snapshot with `postcard` into the
//! output buffer supplied by the trap glue, which copies it to user memory.
//!
//! # System Call Convention (ARM)
//!
//! ```text
//! - System call number in r7
//! - Arguments in r0-r5 (up to 6 arguments)
//! - Return value in r0, negative error code on failure
//! - Invoke via SWI/SVC instruction
//! ```

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use serde::Serialize;
use spin::Mutex;

use crate::debug_print;
use crate::file::{FileDescriptor, FileTable};
use crate::memory::{FrameAllocator, MapFlags, MemoryError, RemapFlags, VirtualAddress};
use crate::process::{Process, ProcessId};

/// Maximum number of system call arguments
pub const MAX_SYSCALL_ARGS: usize = 6;

/// `wmap` flag: private mapping
pub const MAP_PRIVATE: usize = 0x0001;
/// `wmap` flag: shared mapping
pub const MAP_SHARED: usize = 0x0002;
/// `wmap` flag: anonymous mapping
pub const MAP_ANONYMOUS: usize = 0x0004;
/// `wmap` flag: place at exactly the given address
pub const MAP_FIXED: usize = 0x0008;
/// `wremap` flag: region may move
pub const MREMAP_MAYMOVE: usize = 0x0001;

/// System call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SystemCallNumber {
    /// Create a mapping
    Wmap = 22,
    /// Remove a mapping
    Wunmap = 23,
    /// Resize a mapping
    Wremap = 24,
    /// Report resident user pages
    GetPgdirInfo = 25,
    /// Report mappings
    GetWmapInfo = 26,
}

impl TryFrom<u32> for SystemCallNumber {
    type Error = SystemCallError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            22 => Ok(SystemCallNumber::Wmap),
            23 => Ok(SystemCallNumber::Wunmap),
            24 => Ok(SystemCallNumber::Wremap),
            25 => Ok(SystemCallNumber::GetPgdirInfo),
            26 => Ok(SystemCallNumber::GetWmapInfo),
            _ => Err(SystemCallError::InvalidSystemCall),
        }
    }
}

/// System call arguments
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCallArgs {
    /// Arguments array (up to 6 arguments)
    pub args: [usize; MAX_SYSCALL_ARGS],
}

impl SystemCallArgs {
    /// Create new system call arguments
    pub const fn new() -> Self {
        Self {
            args: [0; MAX_SYSCALL_ARGS],
        }
    }

    /// Create from argument array
    pub const fn from_array(args: [usize; MAX_SYSCALL_ARGS]) -> Self {
        Self { args }
    }

    /// Get argument at index
    pub fn get(&self, index: usize) -> Option<usize> {
        self.args.get(index).copied()
    }

    fn arg(&self, index: usize) -> Result<usize, SystemCallError> {
        self.get(index).ok_or(SystemCallError::InvalidArgument)
    }
}

/// System call structure
#[derive(Debug, Clone, Copy)]
pub struct SystemCall {
    /// System call number
    pub number: SystemCallNumber,
    /// Arguments
    pub args: SystemCallArgs,
    /// Calling process ID
    pub caller: ProcessId,
}

impl SystemCall {
    /// Create a new system call
    pub fn new(number: SystemCallNumber, args: SystemCallArgs, caller: ProcessId) -> Self {
        Self {
            number,
            args,
            caller,
        }
    }

    /// Decode a raw trap into a system call
    pub fn decode(number: u32, args: SystemCallArgs, caller: ProcessId) -> Result<Self, SystemCallError> {
        Ok(Self::new(SystemCallNumber::try_from(number)?, args, caller))
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemCallResult {
    /// Return value (non-negative on success, negated error code on failure)
    pub value: isize,
}

impl SystemCallResult {
    /// Create a successful result
    pub const fn ok(value: usize) -> Self {
        Self {
            value: value as isize,
        }
    }

    /// Create an error result
    pub const fn err(error: SystemCallError) -> Self {
        Self {
            value: -(error as isize),
        }
    }

    /// Check if result is successful
    pub fn is_ok(&self) -> bool {
        self.value >= 0
    }

    /// Check if result is an error
    pub fn is_err(&self) -> bool {
        self.value < 0
    }

    /// Get error code if this is an error
    pub fn error(&self) -> Option<SystemCallError> {
        if self.is_err() {
            SystemCallError::try_from(self.value.unsigned_abs() as u32).ok()
        } else {
            None
        }
    }

    /// Returned value as an address, if successful
    pub fn address(&self) -> Option<usize> {
        self.is_ok().then_some(self.value as usize)
    }
}

impl From<Result<usize, SystemCallError>> for SystemCallResult {
    fn from(result: Result<usize, SystemCallError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::err(error),
        }
    }
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SystemCallError {
    /// Invalid system call number
    InvalidSystemCall = 1,
    /// Invalid argument
    InvalidArgument = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// Out of memory
    OutOfMemory = 5,
    /// Resource not found
    NotFound = 7,
    /// I/O error
    IoError = 14,
    /// Invalid address
    InvalidAddress = 16,
    /// Resource limit exceeded
    ResourceLimitExceeded = 18,
    /// Address range already in use
    AddressInUse = 21,
}

impl TryFrom<u32> for SystemCallError {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SystemCallError::InvalidSystemCall),
            2 => Ok(SystemCallError::InvalidArgument),
            3 => Ok(SystemCallError::PermissionDenied),
            5 => Ok(SystemCallError::OutOfMemory),
            7 => Ok(SystemCallError::NotFound),
            14 => Ok(SystemCallError::IoError),
            16 => Ok(SystemCallError::InvalidAddress),
            18 => Ok(SystemCallError::ResourceLimitExceeded),
            21 => Ok(SystemCallError::AddressInUse),
            _ => Err(()),
        }
    }
}

impl From<MemoryError> for SystemCallError {
    fn from(error: MemoryError) -> Self {
        match error {
            MemoryError::InvalidArgument => SystemCallError::InvalidArgument,
            MemoryError::OutOfRange => SystemCallError::InvalidAddress,
            MemoryError::Overlap => SystemCallError::AddressInUse,
            MemoryError::CapacityExceeded => SystemCallError::ResourceLimitExceeded,
            MemoryError::NotFound => SystemCallError::NotFound,
            MemoryError::OutOfMemory => SystemCallError::OutOfMemory,
            MemoryError::Io(_) => SystemCallError::IoError,
        }
    }
}

/// Main system call handler
///
/// `out` receives the serialized snapshot for the info calls and is
/// ignored by the others.
pub fn handle_syscall<F: FileTable, A: FrameAllocator>(
    syscall: SystemCall,
    process: &Process<F>,
    frames: &Mutex<A>,
    out: &mut [u8],
) -> SystemCallResult {
    if syscall.caller != process.id() {
        return SystemCallResult::err(SystemCallError::PermissionDenied);
    }
    process.count_system_call();

    let result = match syscall.number {
        SystemCallNumber::Wmap => handle_wmap(&syscall.args, process),
        SystemCallNumber::Wunmap => handle_wunmap(&syscall.args, process, frames),
        SystemCallNumber::Wremap => handle_wremap(&syscall.args, process, frames),
        SystemCallNumber::GetPgdirInfo => write_snapshot(&process.query_resident_pages(), out),
        SystemCallNumber::GetWmapInfo => write_snapshot(&process.query_mappings(), out),
    };

    if let Err(error) = result {
        debug_print!(
            DEBUG,
            "{:?} from pid {} failed: {:?}",
            syscall.number,
            syscall.caller.as_u32(),
            error
        );
    }
    result.into()
}

fn handle_wmap<F: FileTable>(args: &SystemCallArgs, process: &Process<F>) -> Result<usize, SystemCallError> {
    let addr = VirtualAddress::new(args.arg(0)?);
    let length = args.arg(1)?;
    let flags = u32::try_from(args.arg(2)?)
        .ok()
        .and_then(MapFlags::from_bits)
        .ok_or(SystemCallError::InvalidArgument)?;
    // Anonymous mappings ignore the descriptor, which is usually -1
    let fd = if flags.contains(MapFlags::ANONYMOUS) {
        None
    } else {
        let raw = u32::try_from(args.arg(3)?).map_err(|_| SystemCallError::InvalidArgument)?;
        Some(FileDescriptor::new(raw))
    };

    let base = process.map(addr, length, flags, fd)?;
    Ok(base.as_usize())
}

fn handle_wunmap<F: FileTable, A: FrameAllocator>(
    args: &SystemCallArgs,
    process: &Process<F>,
    frames: &Mutex<A>,
) -> Result<usize, SystemCallError> {
    process.unmap(VirtualAddress::new(args.arg(0)?), frames)?;
    Ok(0)
}

fn handle_wremap<F: FileTable, A: FrameAllocator>(
    args: &SystemCallArgs,
    process: &Process<F>,
    frames: &Mutex<A>,
) -> Result<usize, SystemCallError> {
    let old = VirtualAddress::new(args.arg(0)?);
    let old_size = args.arg(1)?;
    let new_size = args.arg(2)?;
    let flags = u32::try_from(args.arg(3)?)
        .ok()
        .and_then(RemapFlags::from_bits)
        .ok_or(SystemCallError::InvalidArgument)?;

    let base = process.remap(old, old_size, new_size, flags, frames)?;
    Ok(base.as_usize())
}

/// Serialize `snapshot` into `out`, returning the number of bytes used
fn write_snapshot<T: Serialize>(snapshot: &T, out: &mut [u8]) -> Result<usize, SystemCallError> {
    postcard::to_slice(snapshot, out)
        .map(|used| used.len())
        .map_err(|_| SystemCallError::InvalidArgument)
}

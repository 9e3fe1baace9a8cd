//! Zero OS Mapping Subsystem
//!
//! Per-process, lazily populated memory mappings for the Zero OS kernel.
//! A process reserves a range of its mapping window with `wmap`, backed by
//! anonymous zero-filled memory or by an open file. Pages become resident
//! one at a time as the process faults on them, and the region can later be
//! resized with `wremap` or torn down with `wunmap`.
//!
//! # Architecture
//!
//! - [`memory`]: frame pool, page table, region table and address space
//! - [`process`]: per-process locking around the address space and files
//! - [`syscalls`]: argument decoding and result encoding
//! - [`arch`]: debug output and trap-handler glue
//! - [`file`]: the open-file interface the mappings read and write through
//!
//! # Safety
//!
//! The only unsafe code is the ARM debug UART driver. Everything else
//! keeps its invariants through the type system and bounded containers.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(clippy::panic)]
#![warn(clippy::unwrap_used)]

extern crate alloc;

pub mod arch;
pub mod file;
pub mod macros;
pub mod memory;
pub mod process;
pub mod syscalls;

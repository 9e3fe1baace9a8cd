//! Architecture Abstraction Layer
//!
//! This module holds the small amount of glue between the mapping subsystem
//! and the machine: where debug output goes, and how a memory fault taken
//! by the trap handler is turned into a resume-or-kill decision.
//!
//! # Debug Output
//!
//! The kernel registers a console sink early in boot with
//! [`set_console_sink`]. Until it does, output is dropped, except on ARM
//! with the `debug-uart` feature, where it goes straight to the PL011 UART.
//!
//! # Design Principles
//! - Minimal abstraction overhead
//! - Clear separation of architecture-specific code
//! - Safe abstractions over unsafe hardware operations

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use core::fmt;
use spin::Mutex;

use crate::debug_print;
use crate::file::FileTable;
use crate::memory::{FaultResolution, FrameAllocator, VirtualAddress};
use crate::process::Process;

#[cfg(all(target_arch = "arm", feature = "debug-uart"))]
pub mod arm;

/// Console output function
pub type ConsoleSink = fn(&str);

static CONSOLE_SINK: Mutex<Option<ConsoleSink>> = Mutex::new(None);

/// Route debug output to `sink`
pub fn set_console_sink(sink: ConsoleSink) {
    *CONSOLE_SINK.lock() = Some(sink);
}

/// Stop routing debug output to the registered sink
pub fn clear_console_sink() {
    *CONSOLE_SINK.lock() = None;
}

/// Writer used by `debug_print!`
pub struct DebugWriter {
    sink: Option<ConsoleSink>,
}

impl DebugWriter {
    /// Create a writer for the currently registered sink
    pub fn new() -> Self {
        // Copy the sink out so it runs without the lock held
        let sink = *CONSOLE_SINK.lock();
        Self { sink }
    }
}

impl Default for DebugWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for DebugWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self.sink {
            Some(sink) => sink(s),
            #[cfg(all(target_arch = "arm", feature = "debug-uart"))]
            None => arm::uart_write(s),
            #[cfg(not(all(target_arch = "arm", feature = "debug-uart")))]
            None => {}
        }
        Ok(())
    }
}

/// What the trap handler does after a memory fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// The page is mapped now; return to the faulting instruction
    Resume,
    /// The access is invalid or could not be served; kill the process
    Fatal,
}

/// Handle a data or prefetch abort taken by `process` at `fault_address`
pub fn handle_memory_fault<F: FileTable, A: FrameAllocator>(
    process: &Process<F>,
    fault_address: usize,
    frames: &Mutex<A>,
) -> FaultDisposition {
    match process.handle_page_fault(VirtualAddress::new(fault_address), frames) {
        Ok(FaultResolution::Resolved) => FaultDisposition::Resume,
        Ok(FaultResolution::NotOurs) => {
            debug_print!(
                ERROR,
                "Segmentation fault: pid {} at {:#x}",
                process.id().as_u32(),
                fault_address
            );
            FaultDisposition::Fatal
        }
        Err(error) => {
            debug_print!(
                ERROR,
                "Page fault at {:#x} in pid {} failed: {}",
                fault_address,
                process.id().as_u32(),
                error
            );
            FaultDisposition::Fatal
        }
    }
}

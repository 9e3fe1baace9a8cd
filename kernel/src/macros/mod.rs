//! Zero OS Kernel Macros
//!
//! This module provides the kernel's debug output macro and its level
//! filter. Output goes through [`crate::arch::DebugWriter`] and is compiled
//! out of release builds.
//!
//! ```ignore
//! debug_print!(DEBUG, "Mapped {:#x}", base);
//! ```

#![deny(missing_docs)]

use core::sync::atomic::{AtomicU8, Ordering};

/// Debug output levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DebugLevel {
    /// Error messages - always shown
    Error = 0,
    /// Warning messages
    Warning = 1,
    /// Information messages
    Info = 2,
    /// Debug messages
    Debug = 3,
    /// Trace messages - most verbose
    Trace = 4,
}

impl DebugLevel {
    /// Tag printed in front of messages of this level
    pub const fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Error,
            1 => Self::Warning,
            2 => Self::Info,
            3 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

/// Level name accepted by `debug_print!`
pub const ERROR: DebugLevel = DebugLevel::Error;
/// Level name accepted by `debug_print!`
pub const WARNING: DebugLevel = DebugLevel::Warning;
/// Level name accepted by `debug_print!`
pub const INFO: DebugLevel = DebugLevel::Info;
/// Level name accepted by `debug_print!`
pub const DEBUG: DebugLevel = DebugLevel::Debug;
/// Level name accepted by `debug_print!`
pub const TRACE: DebugLevel = DebugLevel::Trace;

static MAX_LEVEL: AtomicU8 = AtomicU8::new(DebugLevel::Info as u8);

/// Set the most verbose level that is printed
pub fn set_max_level(level: DebugLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Most verbose level that is printed
pub fn max_level() -> DebugLevel {
    DebugLevel::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Check whether messages at `level` are printed
pub fn enabled(level: DebugLevel) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Print a kernel debug message at the given level
#[macro_export]
macro_rules! debug_print {
    ($level:ident, $($arg:tt)*) => {
        #[cfg(debug_assertions)]
        {
            let level = $crate::macros::$level;
            if $crate::macros::enabled(level) {
                use core::fmt::Write as _;
                let mut debug_writer = $crate::arch::DebugWriter::new();
                let _ = write!(debug_writer, "[KERNEL] [{}] ", level.label());
                let _ = writeln!(debug_writer, $($arg)*);
            }
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = format_args!($($arg)*);
        }
    };
}

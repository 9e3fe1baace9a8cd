//! ARM Debug UART
//!
//! Fallback console for ARM targets built with `debug-uart`. Writes go to
//! the PL011 UART0 of the QEMU versatilepb board, polling the TX FIFO.
//!
//! # Register Map
//!
//! ```text
//! 0x00: UARTDR   data register
//! 0x18: UARTFR   flag register (bit 5: TX FIFO full)
//! ```

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

/// QEMU versatilepb UART0 base address
const UART0_BASE: usize = 0x101F_1000;

/// Data register offset
const UARTDR: usize = 0x00;

/// Flag register offset
const UARTFR: usize = 0x18;

/// TX FIFO full flag
const TXFF: u32 = 1 << 5;

fn write_byte(byte: u8) {
    let data = (UART0_BASE + UARTDR) as *mut u32;
    let flags = (UART0_BASE + UARTFR) as *const u32;
    // SAFETY: UART0 is identity-mapped device memory on this board and
    // these are its documented data and flag registers.
    unsafe {
        while flags.read_volatile() & TXFF != 0 {}
        data.write_volatile(u32::from(byte));
    }
}

/// Write `s` to UART0, expanding LF to CRLF
pub fn uart_write(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
        if byte == b'\n' {
            write_byte(b'\r');
        }
    }
}

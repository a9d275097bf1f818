//! Platform abstraction trait for the NVM OS core
//!
//! This crate defines the `Platform` trait that allows the kernel core to
//! run against different backends (bare metal, QEMU, host-side tests) by
//! abstracting the hardware-facing collaborators:
//!
//! - VGA text output (`kprint`)
//! - Serial diagnostics (`debug_write`)
//! - Raw I/O port access (`port_in_b` / `port_out_b`)
//! - The whitelisted absolute-memory window (`abs_read` / `abs_write`)
//!
//! The kernel never touches hardware directly; every effectful syscall and
//! opcode goes through this trait. Host-side tests implement it with
//! captured buffers and scripted port values.

#![no_std]

extern crate alloc;

/// Errors returned by platform operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Address is outside every whitelisted physical window
    BadAddress,
    /// Port is not backed by this platform
    BadPort,
    /// Operation not supported on this platform
    NotSupported,
}

impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HalError::BadAddress => write!(f, "address outside whitelisted window"),
            HalError::BadPort => write!(f, "port not backed by platform"),
            HalError::NotSupported => write!(f, "operation not supported"),
        }
    }
}

/// Inclusive start of the heap pool window accepted by reference platforms.
pub const HEAP_WINDOW_START: u32 = 0x10_0000;

/// Text framebuffer window accepted by reference platforms (inclusive).
pub const FRAMEBUFFER_START: u32 = 0xB8000;
/// Last addressable framebuffer byte (inclusive).
pub const FRAMEBUFFER_END: u32 = 0xB8FA0;

/// Platform abstraction for the NVM kernel.
///
/// Implementations provide the platform-specific collaborators the core
/// depends on. All methods take `&self`; implementations use interior
/// mutability where they need state (port devices, captured output).
///
/// # Platform Implementations
///
/// - **Bare metal**: VGA text memory, COM1 serial, `in`/`out` instructions,
///   identity-mapped physical windows.
/// - **Host tests**: captured output buffers, scripted port values, a
///   `BTreeMap`-backed memory window.
pub trait Platform {
    // === Console ===

    /// Write a string to the text console.
    ///
    /// `colour` is a VGA attribute byte; the kernel uses 7 for its own
    /// status lines, 14 for warnings and 15 for process output.
    fn kprint(&self, s: &str, colour: u8);

    /// Write a diagnostic message to the serial channel.
    ///
    /// Fatal process errors are reported here with pid and cause. This is
    /// the kernel's only diagnostic sink; it must never fail.
    fn debug_write(&self, msg: &str);

    // === Raw port I/O ===

    /// Read one byte from an I/O port.
    ///
    /// Reached only through the `PORT_IN_B` syscall, which is gated on the
    /// driver-access capability before the port number is popped.
    fn port_in_b(&self, port: u16) -> Result<u8, HalError>;

    /// Write one byte to an I/O port.
    fn port_out_b(&self, port: u16, value: u8) -> Result<(), HalError>;

    // === Absolute memory window ===

    /// Read an `i32` from a whitelisted physical address.
    ///
    /// The platform owns the whitelist; reference platforms accept the
    /// heap pool from [`HEAP_WINDOW_START`] and the text framebuffer
    /// window [`FRAMEBUFFER_START`]..=[`FRAMEBUFFER_END`]. Addresses
    /// outside every window return [`HalError::BadAddress`], which the
    /// interpreter converts into a fatal fault.
    fn abs_read(&self, addr: u32) -> Result<i32, HalError>;

    /// Write an `i32` to a whitelisted physical address.
    ///
    /// Bytecode images live in kernel-owned buffers outside every window,
    /// so a store can never alias a live image.
    fn abs_write(&self, addr: u32, value: i32) -> Result<(), HalError>;
}

/// Whether `addr` falls in one of the reference whitelisted windows.
///
/// Platform implementations are free to use their own whitelist; this is
/// the window layout of the reference x86 platform, shared so host-side
/// mocks and the real platform agree.
pub fn in_reference_window(addr: u32) -> bool {
    addr >= HEAP_WINDOW_START || (FRAMEBUFFER_START..=FRAMEBUFFER_END).contains(&addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_window_accepts_heap_and_framebuffer() {
        assert!(in_reference_window(HEAP_WINDOW_START));
        assert!(in_reference_window(0xFFFF_FFF0));
        assert!(in_reference_window(FRAMEBUFFER_START));
        assert!(in_reference_window(FRAMEBUFFER_END));
    }

    #[test]
    fn test_reference_window_rejects_low_memory() {
        assert!(!in_reference_window(0));
        assert!(!in_reference_window(0x1000));
        assert!(!in_reference_window(FRAMEBUFFER_START - 1));
        assert!(!in_reference_window(FRAMEBUFFER_END + 1));
    }

    #[test]
    fn test_hal_error_display() {
        use alloc::string::ToString;
        assert_eq!(
            HalError::BadAddress.to_string(),
            "address outside whitelisted window"
        );
        assert_eq!(HalError::BadPort.to_string(), "port not backed by platform");
    }
}

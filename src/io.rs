//! Async I/O traits for host access to target memory.
//!
//! The host drives the whole link through the debug interface's memory
//! access port: the shared register, the channel descriptor, the ring
//! control blocks and the ring slots are all read and written with these
//! two traits.
//!
//! # Possible implementations
//!
//! - SWD or JTAG via a MEM-AP, e.g. from an ST-Link, CMSIS-DAP probe or an
//!   ESP32 bit-banging SWD
//! - An in-memory image of the target, for testing
//!
//! # Address Space
//!
//! Addresses are absolute, as they appear in the target's memory map -
//! SRAM typically at `0x20000000`, the debug registers at `0xE000EDF0`.
//!
//! Word sized accesses to word aligned addresses must be performed as a
//! single bus transaction, as they are used for the ring indices and the
//! shared register.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Reader trait.
pub trait Reader {
    /// The error type returned by read operations.
    ///
    /// Implementations use their own error types, such as a probe's
    /// transfer error.
    type Error: core::fmt::Debug;

    /// Read bytes from target memory at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to read from (e.g., `0x20000010`)
    /// * `buf` - Buffer to fill with the read data
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not accessible, or the debug
    /// transfer fails (WAIT/FAULT responses, probe disconnected, etc.).
    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// Writer trait.
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write bytes to target memory at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to write to (e.g., `0x20000010`)
    /// * `data` - Data to write
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not writable, or the debug
    /// transfer fails.
    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

//! Pseudo-serial port between a debug host and an ARM target, carried over SWD.
//!
//! Many development boards expose a debug probe (ST-Link and friends) but no
//! UART.  This crate emulates a byte-oriented serial link using only what the
//! debug interface already provides:
//! - one 32-bit register both sides can access - the Cortex-M Debug Core
//!   Register Data Register (DCRDR) - used as a liveness, version and
//!   sequence beacon, and
//! - two ring buffers in the target's SRAM, which the host reads and writes
//!   over the debug interface's memory access port.
//!
//! `no_std`.  Requires `alloc` for the async host side.
//!
//! ## Architecture
//!
//! Assumes a Host (debug controller) and Target (microcontroller).  The rings
//! are named from the target's point of view:
//! - **Rx ring**: host writes, target reads
//! - **Tx ring**: target writes, host reads
//!
//! Each ring is a small control block (`size`, `head`, `tail`) followed by
//! one-byte slots.  A slot holding `0x00` is empty.  The producer writes a
//! non-zero slot and then advances `head`; the consumer reads the slot,
//! overwrites it with zero and then advances `tail`.  Each index only ever
//! has a single writer, so no locking is required between host and target.
//!
//! As a zero slot means "empty", the logical byte stream is passed through
//! the zero-escape [`codec`] before it reaches the slots: runs of zero bytes
//! become `0x80, count` and a literal `0x80` becomes `0x80, 0x80`.
//!
//! ## Modules
//!
//! - [`codec`] - Zero-escape encoder and decoder
//! - [`ring`] - Ring buffers, target (sync) and host (async) sides
//! - [`handshake`] - Beacon format, link state machine and channel descriptor
//! - [`signal`] - Shared register and notification handling on the target
//! - [`port`] - Target serial port: `setup()`, `get_next_byte()`, `put_byte()`
//! - [`client`] - Host serial client, typically used by the debug controller
//! - [`io`] - Async I/O traits for host access to target memory
//!
//! ## Getting Started
//!
//! **Target setup**:
//! 1. Reserve two SRAM regions, e.g. 32 bytes for Rx and 140 bytes for Tx
//! 2. Create a static [`signal::Notifier`] around a [`signal::CortexMSignalPort`]
//!    and call [`signal::Notifier::on_signal()`] from the chosen interrupt
//!    handler
//! 3. Create a [`port::SerialPort`] with a [`ring::RamRingIo`] and call
//!    [`port::SerialPort::setup()`]
//! 4. Poll [`port::SerialPort::get_next_byte()`] from the main loop and send
//!    with [`port::SerialPort::put_byte()`]
//!
//! **Host setup**:
//! 1. Implement [`io::Reader`] and [`io::Writer`] for the debug probe
//! 2. Create a [`client::AsyncSerialClient`], either with the ring locations
//!    ([`client::LinkConfig::Direct`]) or with the address of the target's
//!    published channel descriptor ([`client::LinkConfig::FromTarget`])
//! 3. [`client::AsyncSerialClient::connect()`], then
//!    [`client::AsyncSerialClient::write()`] and
//!    [`client::AsyncSerialClient::read()`] on your own polling schedule
//!
//! Notifications in either direction are best effort.  Losing one never
//! loses data, as the ring contents are authoritative.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host side (requires `alloc`).
//!
//! Compile with `--no-default-features` for a Target.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
extern crate alloc;

pub mod client;
pub mod codec;
pub mod handshake;
pub mod io;
pub mod port;
pub mod ring;
pub mod signal;

/// Serial link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No data available
    NoData,
    /// Ring has no room for the data
    QueueFull,
    /// Invalid operation for this side of the ring
    InvalidOperation,
    /// Buffer or memory region too small
    BufferTooSmall,
    /// Address not word aligned
    NotAligned,
    /// Ring or descriptor not initialized by the target
    Uninit,
    /// I/O error
    Io,
    /// Target announced an incompatible protocol version
    VersionMismatch,
    /// Channel descriptor failed validation
    BadDescriptor,
    /// Ring index out of range - the ring must be set up again
    CorruptIndex,
    /// Link is not active
    NotConnected,
    /// Attempt to store a zero byte in a slot
    InvalidSlot,
}

/// Type to represent the result of a serial link operation
pub type Result<T> = core::result::Result<T, Error>;

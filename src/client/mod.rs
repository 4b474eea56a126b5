//! Host client for the pseudo-serial link:
//! - Rx ring: Host writes, Target reads
//! - Tx ring: Target writes, Host reads
//!
//! See [`AsyncSerialClient`] for async client usage, for example on a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncSerialClient};

use crate::handshake::{ChannelDescriptor, DESCRIPTOR_SIGNATURE};

/// Configuration for locating the target's rings.
/// - `Direct`: Ring locations and sizes known up front, e.g. from the
///   target's linker script
/// - `FromTarget`: Read them from the channel descriptor the target
///   publishes at a well known address
#[derive(Debug, Clone, Copy)]
pub enum LinkConfig {
    Direct {
        /// Pointer to the host to target ring in target memory
        rx_ptr: u32,
        /// Size of the host to target ring region in bytes
        rx_size: usize,
        /// Pointer to the target to host ring in target memory
        tx_ptr: u32,
        /// Size of the target to host ring region in bytes
        tx_size: usize,
    },
    FromTarget {
        /// Pointer to the channel descriptor in target memory
        descriptor_ptr: u32,
    },
}

impl LinkConfig {
    /// Descriptor implied by a `Direct` configuration, for `version`.
    pub fn direct_descriptor(&self, version: u8) -> Option<ChannelDescriptor> {
        match *self {
            LinkConfig::Direct {
                rx_ptr,
                rx_size,
                tx_ptr,
                tx_size,
            } => Some(ChannelDescriptor {
                signature: DESCRIPTOR_SIGNATURE,
                version: version as u32,
                rx_base: rx_ptr,
                rx_size: rx_size as u32,
                tx_base: tx_ptr,
                tx_size: tx_size as u32,
            }),
            LinkConfig::FromTarget { .. } => None,
        }
    }
}

/// Host side tuning.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Target interrupt to make pending after writing, if any
    pub signal_irq: Option<u16>,
    /// Raise `signal_irq` after each write that queued data
    pub notify_on_write: bool,
    /// Register polls to wait for the target to announce itself
    pub max_announce_polls: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            signal_irq: None,
            notify_on_write: false,
            max_announce_polls: 100,
        }
    }
}

/// Logical bytes moved by the host since the client was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatistics {
    /// Bytes written towards the target
    pub tx_bytes: u64,
    /// Bytes read from the target
    pub rx_bytes: u64,
}

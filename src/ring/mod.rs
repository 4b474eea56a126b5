//! Ring buffers carrying slot-encoded bytes between Host and Target.
//!
//! One ring per direction.  Each ring lives in a dedicated region of the
//! target's SRAM, laid out as a [`RingCb`] control block followed by
//! one-byte slots:
//!
//! ```text
//! base + 0   size   total region size in bytes, 0 while uninitialized
//! base + 4   head   next slot the producer writes
//! base + 8   tail   next slot the consumer reads
//! base + 12  slots  size - 12 bytes
//! ```
//!
//! `head == tail` means empty.  The ring is full when advancing `head` would
//! make it equal to `tail`, so a ring holds at most `capacity - 1` slots.
//! A zero slot is empty - the consumer zeroes each slot it takes.
//!
//! `head` is only written by the producer and `tail` only by the consumer.
//! The producer writes the slot before publishing `head`, the consumer
//! zeroes the slot before publishing `tail`.
//!
//! - [`sync`] - target side, direct RAM access
//! - [`futures`] - host side, over a debug interface

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncRing, AsyncRingIo, ReaderWriterRingIo, RingCursor};
pub use sync::{RamRing, RamRingIo, Ring, RingIo};

use crate::{Error, Result};

/// Whether the user of this Ring is the Producer or Consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingActor {
    Producer,
    Consumer,
}

/// Control block at the start of each ring region.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RingCb {
    /// Total size of the region, including this control block
    pub size: u32,

    /// Next slot to be written - producer owned
    pub head: u32,

    /// Next slot to be read - consumer owned
    pub tail: u32,
}

/// RingCb offsets
impl RingCb {
    pub const fn size_offset() -> u32 {
        core::mem::offset_of!(RingCb, size) as u32
    }

    pub const fn head_offset() -> u32 {
        core::mem::offset_of!(RingCb, head) as u32
    }

    pub const fn tail_offset() -> u32 {
        core::mem::offset_of!(RingCb, tail) as u32
    }

    pub const fn slots_offset() -> u32 {
        core::mem::size_of::<Self>() as u32
    }

    /// Number of slots in a region of `size` bytes
    pub const fn capacity(size: usize) -> usize {
        size - Self::slots_offset() as usize
    }
}

/// Location and size of one ring region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Base address of the region
    pub base: u32,
    /// Total size of the region in bytes
    pub size: usize,
}

impl RingLayout {
    /// Create and validate a layout.
    pub fn new(base: u32, size: usize) -> Result<Self> {
        check_base_addr(base)?;
        check_ring_size(size)?;
        Ok(Self { base, size })
    }

    pub fn capacity(&self) -> u32 {
        RingCb::capacity(self.size) as u32
    }

    pub fn head_addr(&self) -> u32 {
        self.base + RingCb::head_offset()
    }

    pub fn tail_addr(&self) -> u32 {
        self.base + RingCb::tail_offset()
    }

    pub fn slot_addr(&self, index: u32) -> u32 {
        self.base + RingCb::slots_offset() + index
    }
}

/// Smallest usable ring: control block plus two slots.
pub const MIN_RING_SIZE: usize = RingCb::slots_offset() as usize + 2;

/// Largest number of slots in a ring.
pub const MAX_RING_CAPACITY: usize = 1 << 16;

// Helper functions

fn check_base_addr(addr: u32) -> Result<()> {
    if addr % 4 != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

fn check_ring_size(size: usize) -> Result<()> {
    if size < MIN_RING_SIZE {
        Err(Error::BufferTooSmall)
    } else if RingCb::capacity(size) > MAX_RING_CAPACITY {
        Err(Error::InvalidOperation)
    } else {
        Ok(())
    }
}

fn check_index(index: u32, capacity: u32) -> Result<u32> {
    if index < capacity {
        Ok(index)
    } else {
        Err(Error::CorruptIndex)
    }
}

fn check_slots(slots: &[u8]) -> Result<()> {
    if slots.contains(&0) {
        Err(Error::InvalidSlot)
    } else {
        Ok(())
    }
}

fn consumer_only(actor: RingActor) -> Result<()> {
    if actor != RingActor::Consumer {
        Err(Error::InvalidOperation)
    } else {
        Ok(())
    }
}

fn producer_only(actor: RingActor) -> Result<()> {
    if actor != RingActor::Producer {
        Err(Error::InvalidOperation)
    } else {
        Ok(())
    }
}

const fn advance(index: u32, by: u32, capacity: u32) -> u32 {
    (index + by) % capacity
}

/// Occupied slots between `tail` and `head`.
pub const fn used_slots(head: u32, tail: u32, capacity: u32) -> u32 {
    (head + capacity - tail) % capacity
}

/// Slots the producer may still fill.
pub const fn free_slots(head: u32, tail: u32, capacity: u32) -> u32 {
    capacity - 1 - used_slots(head, tail, capacity)
}

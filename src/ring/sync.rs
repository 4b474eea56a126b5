//! Synchronous Ring - typically used by a Target.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicU32, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::ring::{RingActor, RingCb, RingLayout};
use crate::ring::{advance, check_index, check_slots, consumer_only, free_slots, producer_only};
use crate::ring::{check_base_addr, check_ring_size, used_slots};
use crate::{Error, Result};

/// Trait for accessing a ring in a shared medium (usually RAM).
///
/// Sync version, typically used for direct RAM access on the target.
pub trait RingIo {
    /// Atomic read of an index word, with acquire ordering
    fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Atomic write of an index word, with release ordering
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Read one slot
    fn read_u8(&mut self, addr: u32) -> Result<u8>;

    /// Write one slot
    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()>;

    /// Bulk fill, no need for atomicity
    fn fill(&mut self, addr: u32, len: usize, value: u8) -> Result<()> {
        for offset in 0..len as u32 {
            self.write_u8(addr + offset, value)?;
        }
        Ok(())
    }
}

/// Synchronous ring buffer
pub struct Ring<'a, I: RingIo> {
    io: &'a mut I,
    actor: RingActor,
    layout: RingLayout,
}

impl<'a, I: RingIo> Ring<'a, I> {
    /// Create a new, empty ring.  Used by the Target to (re)initialize the
    /// ring region - any slots still in flight are discarded.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`RingIo`] to access the shared medium
    /// - `actor` - Whether the user is the Consumer or Producer
    /// - `base_addr` - Base address of the ring region
    /// - `size` - Total size of the region in bytes, including the control
    ///   block
    pub fn new(io: &'a mut I, actor: RingActor, base_addr: u32, size: usize) -> Result<Self> {
        let layout = RingLayout::new(base_addr, size)?;

        // Ring is only valid once size is non-zero, so clear it first.
        io.write_u32(base_addr + RingCb::size_offset(), 0)?;

        io.write_u32(layout.head_addr(), 0)?;
        io.write_u32(layout.tail_addr(), 0)?;
        io.fill(layout.slot_addr(0), RingCb::capacity(size), 0)?;

        io.write_u32(base_addr + RingCb::size_offset(), size as u32)?;

        debug!("Created ring {actor:?} at {base_addr:#010X} size {size} bytes");

        Ok(Self::attach(io, actor, layout))
    }

    /// Use a ring already set up with [`Self::new()`], without touching
    /// the medium.
    pub fn attach(io: &'a mut I, actor: RingActor, layout: RingLayout) -> Self {
        Self { io, actor, layout }
    }

    /// Connect to an existing ring, reading its size from the control
    /// block.
    pub fn from_target(io: &'a mut I, actor: RingActor, base_addr: u32) -> Result<Self> {
        check_base_addr(base_addr)?;

        let size = io.read_u32(base_addr + RingCb::size_offset())? as usize;
        if size == 0 {
            return Err(Error::Uninit);
        }
        check_ring_size(size)?;

        Ok(Self::attach(
            io,
            actor,
            RingLayout {
                base: base_addr,
                size,
            },
        ))
    }

    /// Producer: enqueue one slot.
    pub fn push(&mut self, slot: u8) -> Result<()> {
        self.push_slots(&[slot])
    }

    /// Producer: enqueue all of `slots`, or none of them.
    ///
    /// Returns [`Error::QueueFull`] if there is not room for every slot.
    /// Slots must be non-zero.
    pub fn push_slots(&mut self, slots: &[u8]) -> Result<()> {
        producer_only(self.actor)?;
        check_slots(slots)?;

        let capacity = self.layout.capacity();
        let head = self.read_head()?;
        let tail = self.read_tail()?;
        if slots.len() > free_slots(head, tail, capacity) as usize {
            return Err(Error::QueueFull);
        }

        let mut index = head;
        for &slot in slots {
            self.io.write_u8(self.layout.slot_addr(index), slot)?;
            index = advance(index, 1, capacity);
        }

        // Publish by updating head last
        self.io.write_u32(self.layout.head_addr(), index)
    }

    /// Consumer: dequeue one slot.
    ///
    /// Returns `Ok(None)` if the ring is empty.
    pub fn pop(&mut self) -> Result<Option<u8>> {
        consumer_only(self.actor)?;

        let head = self.read_head()?;
        let tail = self.read_tail()?;
        if head == tail {
            return Ok(None);
        }

        let addr = self.layout.slot_addr(tail);
        let slot = self.io.read_u8(addr)?;
        if slot == 0 {
            // Index is ahead of the slot contents - treat as not yet written
            trace!("Ring {:#010X} slot {tail} still empty", self.layout.base);
            return Ok(None);
        }

        // Consume by clearing the slot, then updating tail last
        self.io.write_u8(addr, 0)?;
        self.io.write_u32(
            self.layout.tail_addr(),
            advance(tail, 1, self.layout.capacity()),
        )?;

        Ok(Some(slot))
    }

    /// Slots the producer may still fill.
    pub fn free(&mut self) -> Result<usize> {
        let head = self.read_head()?;
        let tail = self.read_tail()?;
        Ok(free_slots(head, tail, self.layout.capacity()) as usize)
    }

    /// Slots waiting for the consumer.
    pub fn used(&mut self) -> Result<usize> {
        let head = self.read_head()?;
        let tail = self.read_tail()?;
        Ok(used_slots(head, tail, self.layout.capacity()) as usize)
    }

    /// Number of slots, one more than the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.layout.capacity() as usize
    }

    pub fn layout(&self) -> RingLayout {
        self.layout
    }
}

// Internal functions
impl<I: RingIo> Ring<'_, I> {
    fn read_head(&mut self) -> Result<u32> {
        let head = self.io.read_u32(self.layout.head_addr())?;
        check_index(head, self.layout.capacity())
    }

    fn read_tail(&mut self) -> Result<u32> {
        let tail = self.io.read_u32(self.layout.tail_addr())?;
        check_index(tail, self.layout.capacity())
    }
}

/// RAM ring type.  Typically used by a Target.
pub type RamRing<'a> = Ring<'a, RamRingIo>;

/// Ring I/O implementation using direct RAM access
#[derive(Clone, Copy)]
pub struct RamRingIo;

impl RamRingIo {
    /// Create a new RamRingIo instance.
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {}
    }
}

impl RingIo for RamRingIo {
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        // SAFETY: addr is a word aligned index within a ring region the
        // application reserved for this purpose.
        let index = unsafe { &*(addr as usize as *const AtomicU32) };
        Ok(index.load(Ordering::Acquire))
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        // SAFETY: as for read_u32.  Plain stores keep this usable on cores
        // without atomic read-modify-write instructions.
        let index = unsafe { &*(addr as usize as *const AtomicU32) };
        index.store(value, Ordering::Release);
        Ok(())
    }

    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u8) })
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u8, value) };
        Ok(())
    }
}

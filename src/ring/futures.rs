//! Asynchronous Ring - typically used by a Host.
//!
//! The host keeps its own index in a [`RingCursor`] between attachments, as
//! rings are created, used and dropped around each access to the shared
//! [`AsyncRingIo`].
//!
//! As Producer (the Rx ring) the host never reads the target's `tail`.  It
//! infers free space from zeroed slots instead: the slots after `head` which
//! read as zero form a known-empty window, and once that window is used up
//! the host scans again from `head`.
//!
//! As Consumer (the Tx ring) the host snapshots the target's `head`, reads
//! the slots it reveals, zeroes them and publishes its own `tail`.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{Reader, Writer};
use crate::ring::{RingActor, RingCb, RingLayout};
use crate::ring::{advance, check_index, check_slots, consumer_only, producer_only, used_slots};
use crate::ring::{check_base_addr, check_ring_size};
use crate::{Error, Result};

// Largest single slot transfer when scanning or clearing.
const CHUNK: usize = 64;

const ZEROS: [u8; CHUNK] = [0; CHUNK];

/// Trait for accessing a ring in a shared medium (usually RAM).
///
/// Async version, typically used for accessing the medium over SWD or
/// other asynchronous protocols.
#[async_trait(?Send)]
pub trait AsyncRingIo {
    /// Atomic read u32 operation
    async fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Atomic write u32 operation
    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Bulk read of slots, no need for atomicity
    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Bulk write of slots, no need for atomicity
    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}

/// Host position within one ring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    /// The host's own index - `head` as Producer, `tail` as Consumer
    pub index: u32,

    /// Producer only: slots after `index` known to be empty
    pub window: u32,
}

/// Asynchronous ring buffer
pub struct AsyncRing<'a, I: AsyncRingIo> {
    io: &'a mut I,
    actor: RingActor,
    layout: RingLayout,
    cursor: RingCursor,
}

impl<'a, I: AsyncRingIo> AsyncRing<'a, I> {
    /// Connect to an existing ring.  Used by the Host once the Target has
    /// set the ring up.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`AsyncRingIo`] to access the shared
    ///   medium
    /// - `actor` - Whether the user is the Consumer or Producer
    /// - `base_addr` - Base address of the ring region
    pub async fn from_target(io: &'a mut I, actor: RingActor, base_addr: u32) -> Result<Self> {
        check_base_addr(base_addr)?;

        let size = io.read_u32(base_addr + RingCb::size_offset()).await? as usize;
        if size == 0 {
            return Err(Error::Uninit);
        }
        check_ring_size(size)?;

        let layout = RingLayout {
            base: base_addr,
            size,
        };
        let own_index = match actor {
            RingActor::Producer => layout.head_addr(),
            RingActor::Consumer => layout.tail_addr(),
        };
        let index = check_index(io.read_u32(own_index).await?, layout.capacity())?;

        debug!("Attached ring {actor:?} at {base_addr:#010X} size {size} bytes, index {index}");

        Ok(Self::attach(
            io,
            actor,
            layout,
            RingCursor { index, window: 0 },
        ))
    }

    /// Resume using a ring with a cursor saved from an earlier attachment.
    pub fn attach(io: &'a mut I, actor: RingActor, layout: RingLayout, cursor: RingCursor) -> Self {
        Self {
            io,
            actor,
            layout,
            cursor,
        }
    }

    pub fn cursor(&self) -> RingCursor {
        self.cursor
    }

    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    /// Whether the host's own index in the shared medium still matches the
    /// cursor.
    ///
    /// Only the host writes that word, so a mismatch means the target has
    /// set the ring up again since the cursor was saved.
    pub async fn in_sync(&mut self) -> Result<bool> {
        let addr = match self.actor {
            RingActor::Producer => self.layout.head_addr(),
            RingActor::Consumer => self.layout.tail_addr(),
        };
        let index = self.io.read_u32(addr).await?;
        if index != self.cursor.index {
            debug!(
                "Ring {:#010X} {:?} index {index}, expected {}",
                self.layout.base, self.actor, self.cursor.index
            );
        }
        Ok(index == self.cursor.index)
    }

    /// Producer: number of slots that can be pushed.
    ///
    /// Rescans the ring for consumed slots if the known-empty window is
    /// used up.
    pub async fn free(&mut self) -> Result<usize> {
        producer_only(self.actor)?;
        if self.cursor.window == 0 {
            self.rescan().await?;
        }
        Ok(self.cursor.window as usize)
    }

    /// Producer: rescan for consumed slots now, regardless of the known
    /// window.
    pub async fn refresh(&mut self) -> Result<usize> {
        producer_only(self.actor)?;
        self.rescan().await?;
        Ok(self.cursor.window as usize)
    }

    /// Producer: enqueue all of `slots`, or none of them.
    pub async fn push_slots(&mut self, slots: &[u8]) -> Result<()> {
        producer_only(self.actor)?;
        check_slots(slots)?;

        if slots.len() > self.cursor.window as usize {
            self.rescan().await?;
            if slots.len() > self.cursor.window as usize {
                return Err(Error::QueueFull);
            }
        }

        let capacity = self.layout.capacity();
        let head = self.cursor.index;
        let first = slots.len().min((capacity - head) as usize);
        self.io
            .write_bytes(self.layout.slot_addr(head), &slots[..first])
            .await?;
        if first < slots.len() {
            self.io
                .write_bytes(self.layout.slot_addr(0), &slots[first..])
                .await?;
        }

        // Publish by updating head last
        let head = advance(head, slots.len() as u32, capacity);
        self.io.write_u32(self.layout.head_addr(), head).await?;

        self.cursor.index = head;
        self.cursor.window -= slots.len() as u32;

        Ok(())
    }

    /// Consumer: number of slots the target has published.
    pub async fn available(&mut self) -> Result<usize> {
        consumer_only(self.actor)?;
        let head = self.read_head().await?;
        Ok(used_slots(head, self.cursor.index, self.layout.capacity()) as usize)
    }

    /// Consumer: dequeue up to `buf.len()` slots.
    ///
    /// Returns the number of slots read, 0 if the ring is empty.
    pub async fn pop_slots(&mut self, buf: &mut [u8]) -> Result<usize> {
        consumer_only(self.actor)?;

        let capacity = self.layout.capacity();
        let tail = self.cursor.index;
        let head = self.read_head().await?;
        let mut count = (used_slots(head, tail, capacity) as usize).min(buf.len());
        if count == 0 {
            return Ok(0);
        }

        let first = count.min((capacity - tail) as usize);
        self.io
            .read_bytes(self.layout.slot_addr(tail), &mut buf[..first])
            .await?;
        if first < count {
            self.io
                .read_bytes(self.layout.slot_addr(0), &mut buf[first..count])
                .await?;
        }

        // head was published ahead of a slot's contents - stop short of it
        if let Some(pos) = buf[..count].iter().position(|&slot| slot == 0) {
            trace!("Ring {:#010X} slot {} not yet written", self.layout.base, advance(tail, pos as u32, capacity));
            count = pos;
            if count == 0 {
                return Ok(0);
            }
        }

        // Consume by clearing the slots, then updating tail last
        let first = count.min((capacity - tail) as usize);
        self.write_zeros(tail, first).await?;
        if first < count {
            self.write_zeros(0, count - first).await?;
        }

        let tail = advance(tail, count as u32, capacity);
        self.io.write_u32(self.layout.tail_addr(), tail).await?;
        self.cursor.index = tail;

        Ok(count)
    }
}

// Internal functions
impl<I: AsyncRingIo> AsyncRing<'_, I> {
    async fn read_head(&mut self) -> Result<u32> {
        let head = self.io.read_u32(self.layout.head_addr()).await?;
        check_index(head, self.layout.capacity())
    }

    // Count the zero slots following head, up to but excluding head itself.
    async fn rescan(&mut self) -> Result<()> {
        let capacity = self.layout.capacity();
        let mut pos = advance(self.cursor.index, 1, capacity);
        let mut remaining = capacity - 1;
        let mut window = 0;
        let mut buf = [0u8; CHUNK];

        while remaining > 0 {
            let len = remaining.min(capacity - pos).min(CHUNK as u32);
            let chunk = &mut buf[..len as usize];
            self.io.read_bytes(self.layout.slot_addr(pos), chunk).await?;

            let zeros = chunk.iter().take_while(|&&slot| slot == 0).count() as u32;
            window += zeros;
            if zeros < len {
                break;
            }
            remaining -= len;
            pos = advance(pos, len, capacity);
        }

        trace!(
            "Ring {:#010X} rescan from {}: {window} free",
            self.layout.base, self.cursor.index
        );
        self.cursor.window = window;
        Ok(())
    }

    async fn write_zeros(&mut self, index: u32, len: usize) -> Result<()> {
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(CHUNK);
            self.io
                .write_bytes(self.layout.slot_addr(index + done as u32), &ZEROS[..chunk])
                .await?;
            done += chunk;
        }
        Ok(())
    }
}

/// Async Reader/Writer ring type.  Typically used by a Host.
// AsyncRing and ReaderWriterRingIo have different lifetimes so that
// borrowing of each is decoupled from the other.
pub type ReaderWriterRing<'a, 'b, R, W> = AsyncRing<'a, ReaderWriterRingIo<'b, R, W>>;

/// Ring I/O implementation using [`crate::io::Reader`] and
/// [`crate::io::Writer`] traits.
pub struct ReaderWriterRingIo<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: Reader, W: Writer> ReaderWriterRingIo<'a, R, W> {
    /// Create new instance
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncRingIo for ReaderWriterRingIo<'_, R, W> {
    async fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader.read(addr, &mut buf).await.map_err(|e| {
            debug!("Read of {addr:#010X} failed: {e:?}");
            Error::Io
        })?;
        Ok(u32::from_le_bytes(buf))
    }

    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.writer
            .write(addr, &value.to_le_bytes())
            .await
            .map_err(|e| {
                debug!("Write of {addr:#010X} failed: {e:?}");
                Error::Io
            })
    }

    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.reader.read(addr, buf).await.map_err(|_| Error::Io)
    }

    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.writer.write(addr, data).await.map_err(|_| Error::Io)
    }
}

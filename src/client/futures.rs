//! Asynchronous Client - typically used by a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::{ClientOptions, LinkConfig, LinkStatistics};
use crate::codec::{Decoder, encode};
use crate::handshake::{ChannelDescriptor, Handshake, LinkEvent, LinkState};
use crate::io::{Reader, Writer};
use crate::ring::{AsyncRing, AsyncRingIo, ReaderWriterRingIo, RingActor, RingCursor, RingLayout};
use crate::signal::{DCRDR, nvic_bit, nvic_set_pending_addr};
use crate::{Error, Result};

// Slots moved per ring transfer.
const CHUNK: usize = 64;

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// async client to be able to yield, waiting for the target to announce
/// itself, drain the Rx ring or fill the Tx ring.
///
/// This trait keeps `swd-serial` free of any specific async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_millis(10)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

// Rings and host cursors once the link is active.
#[derive(Debug, Clone, Copy)]
struct ActiveLink {
    descriptor: ChannelDescriptor,
    rx: RingLayout,
    tx: RingLayout,
    rx_cursor: RingCursor,
    tx_cursor: RingCursor,
}

/// Async serial client for the host side of the link.
///
/// See [`AsyncDelay`] for required delay trait.
///
/// Example usage:
///
/// ```rust,ignore
/// use swd_serial::client::{AsyncSerialClient, ClientOptions, LinkConfig};
///
/// let config = LinkConfig::FromTarget {
///     descriptor_ptr: 0x2000_00C0,
/// };
/// let mut reader = ...; // implement Reader trait
/// let mut writer = ...; // implement Writer trait
/// let mut client = AsyncSerialClient::<_, _, Delay>::new(
///     &mut reader,
///     &mut writer,
///     config,
///     ClientOptions::default(),
/// );
/// client.connect().await?;
/// client.write_all(b"help\r").await?;
/// let output = client.read().await?;
/// ```
pub struct AsyncSerialClient<'a, R: Reader, W: Writer, D: AsyncDelay> {
    io: ReaderWriterRingIo<'a, R, W>,
    config: LinkConfig,
    options: ClientOptions,
    handshake: Handshake,
    link: Option<ActiveLink>,
    decoder: Decoder,
    stats: LinkStatistics,
    _delay: core::marker::PhantomData<D>,
}

impl<'a, R: Reader, W: Writer, D: AsyncDelay> AsyncSerialClient<'a, R, W, D> {
    /// Create a new AsyncSerialClient
    ///
    /// Arguments:
    /// - `reader`: Reader object to read from target
    /// - `writer`: Writer object to write to target
    /// - `config`: Where to find the rings
    /// - `options`: Notification and polling options
    pub fn new(
        reader: &'a mut R,
        writer: &'a mut W,
        config: LinkConfig,
        options: ClientOptions,
    ) -> Self {
        Self {
            io: ReaderWriterRingIo::new(reader, writer),
            config,
            options,
            handshake: Handshake::new(),
            link: None,
            decoder: Decoder::new(),
            stats: LinkStatistics::default(),
            _delay: core::marker::PhantomData,
        }
    }

    /// Negotiate the link with the target.
    ///
    /// Polls the shared register until the target announces itself, up to
    /// [`ClientOptions::max_announce_polls`] times, then locates and attaches
    /// to both rings.
    ///
    /// Returns:
    /// - `Ok(descriptor)`: Link is active
    /// - `Err(Error::VersionMismatch)`: Target speaks another protocol
    ///   version - there is no fallback
    /// - `Err(Error::NotConnected)`: Target never announced itself
    pub async fn connect(&mut self) -> Result<ChannelDescriptor> {
        self.drop_link();
        self.handshake.restart();

        let result = self.negotiate().await;
        if result.is_err() {
            self.handshake.restart();
        }
        result
    }

    /// Check the shared register for target activity.
    ///
    /// A target which has re-run setup, or disappeared, drops the link; call
    /// [`Self::connect()`] again.
    pub async fn poll_link(&mut self) -> Result<LinkEvent> {
        let raw = self.io.read_u32(DCRDR).await?;
        let event = match self.handshake.observe(raw) {
            Ok(event) => event,
            Err(e) => {
                self.drop_link();
                return Err(e);
            }
        };
        match event {
            LinkEvent::Reset | LinkEvent::Lost => self.drop_link(),
            LinkEvent::Activity(sequence) => trace!("Target activity, sequence {sequence}"),
            _ => {}
        }
        Ok(event)
    }

    /// Write as much of `data` as currently fits in the Rx ring.
    ///
    /// Returns the number of bytes of `data` queued, which may be 0.
    /// Returns `Err(Error::NotConnected)`, and drops the link, if the
    /// target has set its rings up again since [`Self::connect()`].
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        let mut ring = AsyncRing::attach(&mut self.io, RingActor::Producer, link.rx, link.rx_cursor);

        let mut consumed = 0;
        let mut slots = [0u8; CHUNK];
        let result: Result<()> = async {
            if !ring.in_sync().await? {
                return Err(Error::NotConnected);
            }
            let mut free = ring.free().await?;
            while consumed < data.len() {
                if free < 2 {
                    free = ring.refresh().await?;
                    if free == 0 {
                        break;
                    }
                }
                let room = free.min(CHUNK);
                let encoded = encode(&data[consumed..], &mut slots[..room]);
                if encoded.written == 0 {
                    break;
                }
                ring.push_slots(&slots[..encoded.written]).await?;
                consumed += encoded.consumed;
                free -= encoded.written;
            }
            Ok::<(), Error>(())
        }
        .await;

        link.rx_cursor = ring.cursor();
        self.check_result(result)?;

        self.stats.tx_bytes += consumed as u64;
        if consumed > 0 && self.options.notify_on_write && self.options.signal_irq.is_some() {
            self.notify_target().await?;
        }
        Ok(consumed)
    }

    /// Write all of `data`, yielding via [`AsyncDelay`] while the Rx ring is
    /// full.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut pos = 0;
        loop {
            pos += self.write(&data[pos..]).await?;
            if pos == data.len() {
                return Ok(());
            }
            D::delay().await;
        }
    }

    /// Read and decode everything the target has queued.
    ///
    /// An escape pair split across the end of the queued data is held until
    /// the next call.  A target which has set its rings up again drops the
    /// link, as for [`Self::write()`].
    pub async fn read(&mut self) -> Result<Vec<u8>> {
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        let mut ring = AsyncRing::attach(&mut self.io, RingActor::Consumer, link.tx, link.tx_cursor);

        let mut out = Vec::new();
        let mut slots = [0u8; CHUNK];
        let decoder = &mut self.decoder;
        let limit = link.tx.capacity() as usize;
        let result: Result<()> = async {
            if !ring.in_sync().await? {
                return Err(Error::NotConnected);
            }
            // Bounded, so a chatty target can't keep us here forever
            let mut total = 0;
            while total < limit {
                let count = ring.pop_slots(&mut slots).await?;
                if count == 0 {
                    break;
                }
                decoder.decode_into(&slots[..count], &mut out);
                total += count;
            }
            Ok::<(), Error>(())
        }
        .await;

        link.tx_cursor = ring.cursor();
        self.check_result(result)?;

        self.stats.rx_bytes += out.len() as u64;
        Ok(out)
    }

    /// Wait for data from the target, yielding via [`AsyncDelay`] between
    /// polls.
    ///
    /// Returns `Err(Error::NotConnected)` if the target resets while
    /// waiting.
    pub async fn read_wait(&mut self) -> Result<Vec<u8>> {
        loop {
            let data = self.read().await?;
            if !data.is_empty() {
                return Ok(data);
            }
            if let LinkEvent::Reset | LinkEvent::Lost = self.poll_link().await? {
                return Err(Error::NotConnected);
            }
            D::delay().await;
        }
    }

    /// Make the target's notification interrupt pending.  Best effort - the
    /// target polls the Rx ring regardless.
    pub async fn notify_target(&mut self) -> Result<()> {
        let irq = self.options.signal_irq.ok_or(Error::InvalidOperation)?;
        self.io
            .write_u32(nvic_set_pending_addr(irq), nvic_bit(irq))
            .await
    }

    pub fn state(&self) -> LinkState {
        self.handshake.state()
    }

    /// Descriptor of the active link.
    pub fn descriptor(&self) -> Option<ChannelDescriptor> {
        self.link.map(|link| link.descriptor)
    }

    pub fn statistics(&self) -> LinkStatistics {
        self.stats
    }
}

// Internal functions
impl<R: Reader, W: Writer, D: AsyncDelay> AsyncSerialClient<'_, R, W, D> {
    async fn negotiate(&mut self) -> Result<ChannelDescriptor> {
        let mut polls = 0;
        loop {
            let raw = self.io.read_u32(DCRDR).await?;
            self.handshake.observe(raw)?;
            if self.handshake.state() == LinkState::Announced {
                break;
            }

            polls += 1;
            if polls >= self.options.max_announce_polls {
                debug!("No target announcement after {polls} polls");
                return Err(Error::NotConnected);
            }
            D::delay().await;
        }

        let version = self.handshake.supported_version();
        let descriptor = match self.config {
            LinkConfig::FromTarget { descriptor_ptr } => {
                self.read_descriptor(descriptor_ptr).await?
            }
            direct => direct
                .direct_descriptor(version)
                .ok_or(Error::InvalidOperation)?,
        };
        descriptor.validate(version)?;
        self.handshake.negotiated()?;

        let rx = AsyncRing::from_target(&mut self.io, RingActor::Producer, descriptor.rx_base).await?;
        let (rx, rx_cursor) = (rx.layout(), rx.cursor());
        let tx = AsyncRing::from_target(&mut self.io, RingActor::Consumer, descriptor.tx_base).await?;
        let (tx, tx_cursor) = (tx.layout(), tx.cursor());
        if rx.size != descriptor.rx_size as usize || tx.size != descriptor.tx_size as usize {
            warn!("Ring sizes differ from channel descriptor");
            return Err(Error::BadDescriptor);
        }

        self.link = Some(ActiveLink {
            descriptor,
            rx,
            tx,
            rx_cursor,
            tx_cursor,
        });
        self.decoder.reset();
        self.handshake.activate()?;

        info!(
            "Connected: rx {} slots at {:#010X}, tx {} slots at {:#010X}",
            rx.capacity(),
            rx.base,
            tx.capacity(),
            tx.base
        );
        Ok(descriptor)
    }

    async fn read_descriptor(&mut self, addr: u32) -> Result<ChannelDescriptor> {
        let mut words = [0u32; ChannelDescriptor::WORDS];
        // Signature first, so a descriptor still being written reads as
        // uninitialized rather than torn.
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.io.read_u32(addr + i as u32 * 4).await?;
            if i == 0 && *word == 0 {
                return Err(Error::Uninit);
            }
        }
        Ok(ChannelDescriptor::from_words(words))
    }

    fn drop_link(&mut self) {
        if self.link.take().is_some() {
            debug!("Link dropped");
        }
        self.decoder.reset();
    }

    // Ring corruption can only be fixed by the target running setup again,
    // and a target which has done so needs a fresh connection.
    fn check_result(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(Error::CorruptIndex) => warn!("Ring index corrupted, dropping link"),
            Err(Error::NotConnected) => warn!("Target rings set up again, dropping link"),
            _ => return result,
        }
        self.drop_link();
        self.handshake.restart();
        result
    }
}

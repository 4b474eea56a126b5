//! Target serial port.
//!
//! [`SerialPort`] presents the two rings as a byte-oriented serial port:
//! [`SerialPort::get_next_byte()`] reads the host to target stream and
//! [`SerialPort::put_byte()`] writes the target to host stream, both
//! through the zero-escape [`crate::codec`].  Neither blocks - the caller
//! decides whether to spin, drop or do something else.
//!
//! ```rust,ignore
//! static NOTIFIER: Notifier<CortexMSignalPort> =
//!     Notifier::new(CortexMSignalPort::new(DEFAULT_SIGNAL_IRQ));
//!
//! let config = PortConfig {
//!     rx_base: 0x2000_0000,
//!     rx_size: 28,
//!     tx_base: 0x2000_0020,
//!     tx_size: 140,
//!     descriptor_addr: Some(0x2000_00C0),
//! };
//! let mut port = SerialPort::new(RamRingIo::new(), &NOTIFIER, config)?;
//! port.setup()?;
//!
//! loop {
//!     if let Some(byte) = port.get_next_byte()? {
//!         while port.put_byte(byte) == Err(Error::QueueFull) {}
//!     }
//! }
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::codec::{Decoder, encode_byte};
use crate::handshake::{ChannelDescriptor, PROTOCOL_VERSION};
use crate::ring::{Ring, RingActor, RingIo, RingLayout};
use crate::signal::{Notifier, SignalPort};
use crate::{Error, Result};

/// Memory reserved for the port on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Base address of the host to target ring region
    pub rx_base: u32,
    /// Size of the host to target ring region, including control block
    pub rx_size: usize,
    /// Base address of the target to host ring region
    pub tx_base: u32,
    /// Size of the target to host ring region, including control block
    pub tx_size: usize,
    /// Where to publish the [`ChannelDescriptor`], if anywhere
    pub descriptor_addr: Option<u32>,
}

/// Logical bytes moved since the last setup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// Bytes accepted by [`SerialPort::put_byte()`]
    pub tx_bytes: u32,
    /// Bytes returned by [`SerialPort::get_next_byte()`]
    pub rx_bytes: u32,
}

/// Target side of the pseudo-serial link.
pub struct SerialPort<'n, I: RingIo, S: SignalPort> {
    io: I,
    notifier: &'n Notifier<S>,
    rx: RingLayout,
    tx: RingLayout,
    descriptor_addr: Option<u32>,
    decoder: Decoder,
    stats: Statistics,
    ready: bool,
}

impl<'n, I: RingIo, S: SignalPort> SerialPort<'n, I, S> {
    /// Create a port.  Nothing is written until [`Self::setup()`].
    ///
    /// Arguments:
    /// - `io` - Object implementing [`RingIo`], normally
    ///   [`crate::ring::RamRingIo`]
    /// - `notifier` - Notification state shared with the interrupt handler
    /// - `config` - Ring regions and descriptor location
    pub fn new(io: I, notifier: &'n Notifier<S>, config: PortConfig) -> Result<Self> {
        let rx = RingLayout::new(config.rx_base, config.rx_size)?;
        let tx = RingLayout::new(config.tx_base, config.tx_size)?;
        ChannelDescriptor::new(rx, tx).validate(PROTOCOL_VERSION)?;
        if config.descriptor_addr.is_some_and(|addr| addr % 4 != 0) {
            return Err(Error::NotAligned);
        }

        Ok(Self {
            io,
            notifier,
            rx,
            tx,
            descriptor_addr: config.descriptor_addr,
            decoder: Decoder::new(),
            stats: Statistics::default(),
            ready: false,
        })
    }

    /// (Re)initialize both rings and announce the port to the host.
    ///
    /// Idempotent.  Anything in flight in either direction is discarded and
    /// the statistics restart from zero.
    pub fn setup(&mut self) -> Result<()> {
        self.ready = false;
        self.stats = Statistics::default();
        self.decoder.reset();

        Ring::new(&mut self.io, RingActor::Consumer, self.rx.base, self.rx.size)?;
        Ring::new(&mut self.io, RingActor::Producer, self.tx.base, self.tx.size)?;

        if let Some(addr) = self.descriptor_addr {
            self.publish_descriptor(addr)?;
        }

        self.notifier.announce();
        self.notifier.enable();
        self.ready = true;

        debug!(
            "Serial port ready, rx {} slots at {:#010X}, tx {} slots at {:#010X}",
            self.rx.capacity(),
            self.rx.base,
            self.tx.capacity(),
            self.tx.base
        );
        Ok(())
    }

    /// Read the next byte sent by the host.
    ///
    /// Returns `Ok(None)` if nothing is available, including when only the
    /// first half of an escape pair has arrived.
    pub fn get_next_byte(&mut self) -> Result<Option<u8>> {
        self.check_ready()?;

        let mut ring = Ring::attach(&mut self.io, RingActor::Consumer, self.rx);
        let result = self.decoder.next_byte(|| ring.pop());
        if let Ok(Some(_)) = result {
            self.stats.rx_bytes = self.stats.rx_bytes.wrapping_add(1);
        }
        self.recover(result)
    }

    /// Queue a byte for the host.
    ///
    /// Returns [`Error::QueueFull`] if there is no room, in which case
    /// nothing was queued.  `0x00` and `0x80` need two free slots.
    pub fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.check_ready()?;

        let (slots, len) = encode_byte(byte);
        let result =
            Ring::attach(&mut self.io, RingActor::Producer, self.tx).push_slots(&slots[..len]);
        if result.is_ok() {
            self.stats.tx_bytes = self.stats.tx_bytes.wrapping_add(1);
        }
        self.recover(result)
    }

    /// Queue as much of `data` as fits.  Returns the number of bytes queued.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        for (written, &byte) in data.iter().enumerate() {
            match self.put_byte(byte) {
                Ok(()) => {}
                Err(Error::QueueFull) => return Ok(written),
                Err(e) => return Err(e),
            }
        }
        Ok(data.len())
    }

    /// Slots the host has written which are still to be read.
    pub fn rx_pending(&mut self) -> Result<usize> {
        self.check_ready()?;
        let result = Ring::attach(&mut self.io, RingActor::Consumer, self.rx).used();
        self.recover(result)
    }

    /// Slots free for [`Self::put_byte()`].
    pub fn tx_free(&mut self) -> Result<usize> {
        self.check_ready()?;
        let result = Ring::attach(&mut self.io, RingActor::Producer, self.tx).free();
        self.recover(result)
    }

    /// Raise a notification towards the host.  Best effort.
    pub fn notify_host(&self) {
        self.notifier.raise();
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// The channel descriptor this port publishes.
    pub fn descriptor(&self) -> ChannelDescriptor {
        ChannelDescriptor::new(self.rx, self.tx)
    }
}

// Internal functions
impl<I: RingIo, S: SignalPort> SerialPort<'_, I, S> {
    fn check_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(Error::Uninit)
        }
    }

    // A corrupt index can't be repaired in place without reordering or
    // duplicating data, so start the channel over.
    fn recover<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(Error::CorruptIndex) = result {
            warn!("Ring index corrupted, resetting serial port");
            if let Err(e) = self.setup() {
                error!("Serial port reset failed: {e:?}");
            }
        }
        result
    }

    fn publish_descriptor(&mut self, addr: u32) -> Result<()> {
        let words = self.descriptor().to_words();
        let signature_addr = addr + ChannelDescriptor::signature_offset();

        // Descriptor is only valid once the signature is written, so clear
        // it first and write it last.
        self.io.write_u32(signature_addr, 0)?;
        for (i, word) in words.iter().enumerate().skip(1) {
            self.io.write_u32(addr + i as u32 * 4, *word)?;
        }
        self.io.write_u32(signature_addr, words[0])?;

        debug!("Published channel descriptor at {addr:#010X}");
        Ok(())
    }
}

//! Channel handshake: the beacon in the shared register, the host's link
//! state machine and the channel descriptor.
//!
//! The target announces itself by writing [`MAGIC_BASE`] to the shared
//! register (DCRDR on Cortex-M).  The register is laid out as:
//!
//! ```text
//! 31        16 15      8 7       0
//! +-----------+---------+---------+
//! |  0xDB19   | version | sequence|
//! +-----------+---------+---------+
//! ```
//!
//! Sequence 0 is only ever written by setup.  Each notification the target
//! handles advances the sequence through 1..=255, wrapping back to 1, so a
//! host which sees the sequence return to 0, or step backwards, knows the
//! target was set up again and its view of the rings is stale.
//!
//! A reset followed by enough notifications can still look like forward
//! progress, so the host client also checks the ring indices only it
//! writes before each transfer.
//!
//! Link states, as seen by the host:
//!
//! `Uninitialized` → `Announced` → `Negotiated` → `Active`
//!
//! A version mismatch, a vanished beacon or a re-announcement drops the
//! host back to the start.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::ring::RingLayout;
use crate::{Error, Result};

/// Upper half of the shared register while a target is present
pub const MAGIC_SIGNATURE: u32 = 0xDB19_0000;

const SIGNATURE_MASK: u32 = 0xFFFF_0000;

/// Protocol version carried in the beacon and the channel descriptor
pub const PROTOCOL_VERSION: u8 = 0x65;

/// Value the target writes to the shared register on setup
pub const MAGIC_BASE: u32 = Beacon::announcement().to_raw();

/// Contents of the shared register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub version: u8,
    pub sequence: u8,
}

impl Beacon {
    pub const fn new(version: u8, sequence: u8) -> Self {
        Self { version, sequence }
    }

    /// Beacon written by setup.
    pub const fn announcement() -> Self {
        Self::new(PROTOCOL_VERSION, 0)
    }

    pub const fn to_raw(self) -> u32 {
        MAGIC_SIGNATURE | (self.version as u32) << 8 | self.sequence as u32
    }

    /// Parse a register value.  `None` if no target has announced itself.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw & SIGNATURE_MASK != MAGIC_SIGNATURE {
            return None;
        }
        Some(Self::new((raw >> 8) as u8, raw as u8))
    }

    /// Beacon after one more notification.
    pub const fn next(self) -> Self {
        let sequence = match self.sequence {
            u8::MAX => 1,
            n => n + 1,
        };
        Self::new(self.version, sequence)
    }

    pub const fn is_announcement(&self) -> bool {
        self.sequence == 0
    }

    /// Whether notifications alone could take the register from `last` to
    /// this beacon.
    ///
    /// Counts a step of up to half the 1..=255 cycle as forward, which
    /// includes the wrap from 255 to 1.
    pub const fn follows(&self, last: Beacon) -> bool {
        if self.sequence == last.sequence || last.sequence == 0 {
            return true;
        }
        if self.sequence == 0 {
            return false;
        }
        let step =
            (self.sequence as u16 + SEQUENCE_CYCLE - last.sequence as u16) % SEQUENCE_CYCLE;
        step <= SEQUENCE_CYCLE / 2
    }
}

// Distinct sequence values after setup.
const SEQUENCE_CYCLE: u16 = u8::MAX as u16;

/// Host view of the link
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No target seen
    #[default]
    Uninitialized,
    /// Compatible target seen, rings not yet located
    Announced,
    /// Channel descriptor read and validated
    Negotiated,
    /// Host is reading and writing the rings
    Active,
}

/// What a single observation of the shared register revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// No beacon, and none seen before
    Absent,
    /// A compatible target announced itself
    Announced,
    /// Nothing changed
    Quiet,
    /// The target handled a notification
    Activity(u8),
    /// The target ran setup again - negotiation must restart
    Reset,
    /// The beacon disappeared from the register
    Lost,
}

/// Host side handshake state machine.
///
/// Pure - the caller reads the register and feeds the value to
/// [`Handshake::observe()`].
#[derive(Debug, Clone)]
pub struct Handshake {
    state: LinkState,
    last: Option<Beacon>,
    supported_version: u8,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub const fn new() -> Self {
        Self::with_version(PROTOCOL_VERSION)
    }

    /// Handshake accepting only `version`.
    pub const fn with_version(version: u8) -> Self {
        Self {
            state: LinkState::Uninitialized,
            last: None,
            supported_version: version,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn supported_version(&self) -> u8 {
        self.supported_version
    }

    /// Last beacon seen, if any.
    pub fn beacon(&self) -> Option<Beacon> {
        self.last
    }

    /// Process one read of the shared register.
    ///
    /// Returns [`Error::VersionMismatch`] for a target speaking another
    /// protocol version.  The link is left `Uninitialized` in that case.
    pub fn observe(&mut self, raw: u32) -> Result<LinkEvent> {
        let Some(beacon) = Beacon::from_raw(raw) else {
            if self.state == LinkState::Uninitialized {
                return Ok(LinkEvent::Absent);
            }
            warn!("Beacon lost (register {raw:#010X})");
            self.restart();
            return Ok(LinkEvent::Lost);
        };

        if beacon.version != self.supported_version {
            warn!(
                "Target protocol version {:#04X}, supported {:#04X}",
                beacon.version, self.supported_version
            );
            self.restart();
            return Err(Error::VersionMismatch);
        }

        let event = match (self.state, self.last) {
            (LinkState::Uninitialized, _) | (_, None) => {
                debug!("Target announced, sequence {}", beacon.sequence);
                self.state = LinkState::Announced;
                LinkEvent::Announced
            }
            (_, Some(last)) if last.sequence == beacon.sequence => LinkEvent::Quiet,
            (LinkState::Announced, Some(last)) if !beacon.follows(last) => LinkEvent::Announced,
            (LinkState::Announced, Some(_)) => LinkEvent::Activity(beacon.sequence),
            (_, Some(last)) if !beacon.follows(last) => {
                warn!(
                    "Target re-announced (sequence {} after {}), restarting negotiation",
                    beacon.sequence, last.sequence
                );
                self.state = LinkState::Announced;
                LinkEvent::Reset
            }
            (_, Some(_)) => LinkEvent::Activity(beacon.sequence),
        };

        self.last = Some(beacon);
        Ok(event)
    }

    /// Record that the channel descriptor has been read and validated.
    pub fn negotiated(&mut self) -> Result<()> {
        match self.state {
            LinkState::Announced => {
                self.state = LinkState::Negotiated;
                Ok(())
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Record that the host has attached to both rings.
    pub fn activate(&mut self) -> Result<()> {
        match self.state {
            LinkState::Negotiated => {
                debug!("Link active");
                self.state = LinkState::Active;
                Ok(())
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Forget the target and start again.
    pub fn restart(&mut self) {
        self.state = LinkState::Uninitialized;
        self.last = None;
    }
}

/// Signature at the start of a published channel descriptor
pub const DESCRIPTOR_SIGNATURE: u32 = u32::from_le_bytes(*b"SWDS");

/// Channel descriptor, optionally published by the target at a well known
/// address so the host can locate the rings.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// [`DESCRIPTOR_SIGNATURE`] once the descriptor is valid
    pub signature: u32,

    /// Protocol version
    pub version: u32,

    /// Base address of the host to target ring
    pub rx_base: u32,

    /// Total size of the host to target ring region
    pub rx_size: u32,

    /// Base address of the target to host ring
    pub tx_base: u32,

    /// Total size of the target to host ring region
    pub tx_size: u32,
}

impl ChannelDescriptor {
    /// Size of the descriptor in 32-bit words
    pub const WORDS: usize = core::mem::size_of::<Self>() / 4;

    pub fn new(rx: RingLayout, tx: RingLayout) -> Self {
        Self {
            signature: DESCRIPTOR_SIGNATURE,
            version: PROTOCOL_VERSION as u32,
            rx_base: rx.base,
            rx_size: rx.size as u32,
            tx_base: tx.base,
            tx_size: tx.size as u32,
        }
    }

    pub const fn signature_offset() -> u32 {
        core::mem::offset_of!(ChannelDescriptor, signature) as u32
    }

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [
            self.signature,
            self.version,
            self.rx_base,
            self.rx_size,
            self.tx_base,
            self.tx_size,
        ]
    }

    pub fn from_words(words: [u32; Self::WORDS]) -> Self {
        let [signature, version, rx_base, rx_size, tx_base, tx_size] = words;
        Self {
            signature,
            version,
            rx_base,
            rx_size,
            tx_base,
            tx_size,
        }
    }

    /// Check the descriptor is complete, speaks `version` and describes two
    /// usable, disjoint rings.
    pub fn validate(&self, version: u8) -> Result<()> {
        match self.signature {
            0 => return Err(Error::Uninit),
            DESCRIPTOR_SIGNATURE => {}
            _ => return Err(Error::BadDescriptor),
        }
        if self.version != version as u32 {
            return Err(Error::VersionMismatch);
        }

        let rx = self.rx()?;
        let tx = self.tx()?;
        if overlaps(rx, tx) {
            return Err(Error::BadDescriptor);
        }
        Ok(())
    }

    pub fn rx(&self) -> Result<RingLayout> {
        RingLayout::new(self.rx_base, self.rx_size as usize)
    }

    pub fn tx(&self) -> Result<RingLayout> {
        RingLayout::new(self.tx_base, self.tx_size as usize)
    }
}

fn overlaps(a: RingLayout, b: RingLayout) -> bool {
    let (a_start, b_start) = (a.base as u64, b.base as u64);
    a_start < b_start + b.size as u64 && b_start < a_start + a.size as u64
}

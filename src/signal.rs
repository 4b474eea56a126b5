//! Shared register and notification handling on the target.
//!
//! [`SignalPort`] abstracts the hardware: the register both sides can see,
//! and an interrupt the host can raise to wake the target.  On Cortex-M the
//! register is DCRDR and the interrupt is any otherwise unused NVIC vector -
//! see [`CortexMSignalPort`].
//!
//! [`Notifier`] holds the state the interrupt handler owns.  Put it in a
//! static and call [`Notifier::on_signal()`] from the handler:
//!
//! ```rust,ignore
//! static NOTIFIER: Notifier<CortexMSignalPort> =
//!     Notifier::new(CortexMSignalPort::new(DEFAULT_SIGNAL_IRQ));
//!
//! #[interrupt]
//! fn FSMC() {
//!     NOTIFIER.on_signal();
//! }
//! ```
//!
//! The handler only touches the register and its own counter, never the
//! rings, so it cannot race the foreground `SerialPort`.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicU32, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::handshake::{Beacon, MAGIC_BASE, PROTOCOL_VERSION};

/// Debug Core Register Data Register
pub const DCRDR: u32 = 0xE000_EDF8;

/// NVIC Interrupt Set-Enable Registers
pub const NVIC_ISER: u32 = 0xE000_E100;

/// NVIC Interrupt Set-Pending Registers
pub const NVIC_ISPR: u32 = 0xE000_E200;

/// FSMC on STM32F10x - rarely used, so free for the link.
pub const DEFAULT_SIGNAL_IRQ: u16 = 48;

/// Address of the NVIC set-enable word covering `irq`.
pub const fn nvic_set_enable_addr(irq: u16) -> u32 {
    NVIC_ISER + 4 * (irq as u32 >> 5)
}

/// Address of the NVIC set-pending word covering `irq`.
pub const fn nvic_set_pending_addr(irq: u16) -> u32 {
    NVIC_ISPR + 4 * (irq as u32 >> 5)
}

/// Bit for `irq` within its NVIC word.
pub const fn nvic_bit(irq: u16) -> u32 {
    1 << (irq & 0x1F)
}

/// Hardware used for signaling between Target and Host.
pub trait SignalPort {
    /// Write `value` to the shared register
    fn announce(&self, value: u32);

    /// Read back the shared register
    fn read(&self) -> u32;

    /// Allow the notification interrupt to fire
    fn enable_signal(&self);

    /// Make the notification interrupt pending on this side
    fn raise_signal(&self);
}

/// [`SignalPort`] using DCRDR and an NVIC interrupt line.
#[derive(Debug, Clone, Copy)]
pub struct CortexMSignalPort {
    irq: u16,
}

impl CortexMSignalPort {
    pub const fn new(irq: u16) -> Self {
        Self { irq }
    }

    pub const fn irq(&self) -> u16 {
        self.irq
    }
}

impl SignalPort for CortexMSignalPort {
    fn announce(&self, value: u32) {
        unsafe { core::ptr::write_volatile(DCRDR as usize as *mut u32, value) };
    }

    fn read(&self) -> u32 {
        unsafe { core::ptr::read_volatile(DCRDR as usize as *const u32) }
    }

    fn enable_signal(&self) {
        // Set-enable registers ignore zero bits, so no read-modify-write.
        let addr = nvic_set_enable_addr(self.irq) as usize as *mut u32;
        unsafe { core::ptr::write_volatile(addr, nvic_bit(self.irq)) };
    }

    fn raise_signal(&self) {
        let addr = nvic_set_pending_addr(self.irq) as usize as *mut u32;
        unsafe { core::ptr::write_volatile(addr, nvic_bit(self.irq)) };
    }
}

/// Notification handler state, shared between the handler and the
/// foreground.
///
/// The sequence lives only in the shared register.  The foreground writes
/// the register once, in [`Self::announce()`], and otherwise only the
/// handler writes it or the signal counter, so a handler firing part way
/// through an announcement cannot leave them out of step.
pub struct Notifier<S: SignalPort> {
    port: S,
    signals: AtomicU32,
}

impl<S: SignalPort> Notifier<S> {
    pub const fn new(port: S) -> Self {
        Self {
            port,
            signals: AtomicU32::new(0),
        }
    }

    /// Write the setup beacon, restarting the sequence.
    pub fn announce(&self) {
        self.port.announce(MAGIC_BASE);
        debug!("Announced {MAGIC_BASE:#010X}");
    }

    /// Body of the notification interrupt handler.
    ///
    /// Advances the sequence in the shared register, telling the host the
    /// target is alive and has seen its notification.  Single writer, so a
    /// plain load and store is enough on cores without atomic
    /// read-modify-write.
    pub fn on_signal(&self) {
        let next = self.beacon().next();
        self.port.announce(next.to_raw());
        let signals = self.signals.load(Ordering::Relaxed);
        self.signals
            .store(signals.wrapping_add(1), Ordering::Relaxed);
    }

    /// Enable the notification interrupt.
    pub fn enable(&self) {
        self.port.enable_signal();
    }

    /// Raise a notification towards the host, via our own handler.
    pub fn raise(&self) {
        self.port.raise_signal();
    }

    /// Current sequence number in the shared register.
    pub fn sequence(&self) -> u8 {
        self.beacon().sequence
    }

    /// Notifications handled since the notifier was created.
    pub fn signals(&self) -> u32 {
        self.signals.load(Ordering::Relaxed)
    }

    /// Read the shared register.
    pub fn register(&self) -> u32 {
        self.port.read()
    }

    pub fn port(&self) -> &S {
        &self.port
    }

    // Anything other than our own beacon counts as a fresh announcement.
    fn beacon(&self) -> Beacon {
        match Beacon::from_raw(self.port.read()) {
            Some(beacon) if beacon.version == PROTOCOL_VERSION => beacon,
            _ => Beacon::announcement(),
        }
    }
}

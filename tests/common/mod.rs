// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated target for host/target tests.
//!
//! One memory image holds the target's SRAM, the shared register and the
//! NVIC set-pending words.  The target side reaches it through [`RingIo`]
//! and [`SignalPort`], the host side through [`Reader`] and [`Writer`], as
//! a debug probe would.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use swd_serial::Error;
use swd_serial::client::{AsyncDelay, ClientOptions, LinkConfig};
use swd_serial::io::{Reader, Writer};
use swd_serial::port::PortConfig;
use swd_serial::ring::RingIo;
use swd_serial::signal::{DCRDR, NVIC_ISPR, SignalPort, nvic_bit, nvic_set_pending_addr};

pub const SRAM_BASE: u32 = 0x2000_0000;
pub const SRAM_SIZE: usize = 0x400;

pub const RX_BASE: u32 = SRAM_BASE;
pub const RX_SIZE: usize = 28;
pub const TX_BASE: u32 = SRAM_BASE + 0x20;
pub const TX_SIZE: usize = 140;
pub const DESCRIPTOR_ADDR: u32 = SRAM_BASE + 0xC0;

pub const SIGNAL_IRQ: u16 = 48;

const ISPR_WORDS: usize = 16;

#[derive(Debug)]
pub struct SimError(pub u32);

struct State {
    sram: Vec<u8>,
    register: u32,
    ispr: [u32; ISPR_WORDS],
    signal_enabled: bool,
    host_notifications: u32,
}

impl State {
    fn read_byte(&self, addr: u32) -> Result<u8, SimError> {
        if let Some(offset) = sram_offset(addr) {
            return Ok(self.sram[offset]);
        }
        if (DCRDR..DCRDR + 4).contains(&addr) {
            return Ok(self.register.to_le_bytes()[(addr - DCRDR) as usize]);
        }
        if let Some((word, byte)) = ispr_offset(addr) {
            return Ok(self.ispr[word].to_le_bytes()[byte]);
        }
        Err(SimError(addr))
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), SimError> {
        if let Some(offset) = sram_offset(addr) {
            self.sram[offset] = value;
            return Ok(());
        }
        if (DCRDR..DCRDR + 4).contains(&addr) {
            let mut bytes = self.register.to_le_bytes();
            bytes[(addr - DCRDR) as usize] = value;
            self.register = u32::from_le_bytes(bytes);
            return Ok(());
        }
        if let Some((word, byte)) = ispr_offset(addr) {
            // Set-pending: zero bits have no effect
            self.ispr[word] |= (value as u32) << (byte * 8);
            return Ok(());
        }
        Err(SimError(addr))
    }
}

fn sram_offset(addr: u32) -> Option<usize> {
    let offset = addr.checked_sub(SRAM_BASE)? as usize;
    (offset < SRAM_SIZE).then_some(offset)
}

fn ispr_offset(addr: u32) -> Option<(usize, usize)> {
    let offset = addr.checked_sub(NVIC_ISPR)? as usize;
    (offset < ISPR_WORDS * 4).then_some((offset / 4, offset % 4))
}

/// Handle to the simulated target.  Clones share the same memory.
#[derive(Clone)]
pub struct SimTarget {
    state: Arc<Mutex<State>>,
}

impl SimTarget {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                sram: vec![0; SRAM_SIZE],
                register: 0,
                ispr: [0; ISPR_WORDS],
                signal_enabled: false,
                host_notifications: 0,
            })),
        }
    }

    pub fn register(&self) -> u32 {
        self.state.lock().unwrap().register
    }

    pub fn set_register(&self, value: u32) {
        self.state.lock().unwrap().register = value;
    }

    pub fn signal_enabled(&self) -> bool {
        self.state.lock().unwrap().signal_enabled
    }

    /// Notifications the target has raised towards the host.
    pub fn host_notifications(&self) -> u32 {
        self.state.lock().unwrap().host_notifications
    }

    /// Clear `irq`'s pending bit, returning whether it was set - as the
    /// NVIC does when the handler is entered.
    pub fn take_pending(&self, irq: u16) -> bool {
        let mut state = self.state.lock().unwrap();
        let word = ((nvic_set_pending_addr(irq) - NVIC_ISPR) / 4) as usize;
        let pending = state.ispr[word] & nvic_bit(irq) != 0;
        state.ispr[word] &= !nvic_bit(irq);
        pending
    }

    pub fn sram(&self, addr: u32, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        (addr..addr + len as u32)
            .map(|a| state.read_byte(a).unwrap())
            .collect()
    }

    pub fn poke_u32(&self, addr: u32, value: u32) {
        let mut state = self.state.lock().unwrap();
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            state.write_byte(addr + i as u32, byte).unwrap();
        }
    }
}

// Target side

impl RingIo for SimTarget {
    fn read_u32(&mut self, addr: u32) -> swd_serial::Result<u32> {
        let bytes = self.sram(addr, 4);
        Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| Error::Io)?))
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> swd_serial::Result<()> {
        self.poke_u32(addr, value);
        Ok(())
    }

    fn read_u8(&mut self, addr: u32) -> swd_serial::Result<u8> {
        self.state.lock().unwrap().read_byte(addr).map_err(|_| Error::Io)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> swd_serial::Result<()> {
        self.state
            .lock()
            .unwrap()
            .write_byte(addr, value)
            .map_err(|_| Error::Io)
    }
}

impl SignalPort for SimTarget {
    fn announce(&self, value: u32) {
        self.set_register(value);
    }

    fn read(&self) -> u32 {
        self.register()
    }

    fn enable_signal(&self) {
        self.state.lock().unwrap().signal_enabled = true;
    }

    fn raise_signal(&self) {
        self.state.lock().unwrap().host_notifications += 1;
    }
}

// Host side, as seen through a debug probe

impl Reader for SimTarget {
    type Error = SimError;

    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send {
        let state = self.state.lock().unwrap();
        let result = buf
            .iter_mut()
            .zip(addr..)
            .try_for_each(|(byte, a)| state.read_byte(a).map(|value| *byte = value));
        core::future::ready(result)
    }
}

impl Writer for SimTarget {
    type Error = SimError;

    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = data
            .iter()
            .zip(addr..)
            .try_for_each(|(&byte, a)| state.write_byte(a, byte));
        core::future::ready(result)
    }
}

/// Delay which returns immediately.  Tests drive the target by hand.
pub struct NoDelay;

impl AsyncDelay for NoDelay {
    async fn delay() {}
}

pub fn port_config() -> PortConfig {
    PortConfig {
        rx_base: RX_BASE,
        rx_size: RX_SIZE,
        tx_base: TX_BASE,
        tx_size: TX_SIZE,
        descriptor_addr: Some(DESCRIPTOR_ADDR),
    }
}

pub fn from_target() -> LinkConfig {
    LinkConfig::FromTarget {
        descriptor_ptr: DESCRIPTOR_ADDR,
    }
}

pub fn direct() -> LinkConfig {
    LinkConfig::Direct {
        rx_ptr: RX_BASE,
        rx_size: RX_SIZE,
        tx_ptr: TX_BASE,
        tx_size: TX_SIZE,
    }
}

pub fn options() -> ClientOptions {
    ClientOptions {
        max_announce_polls: 3,
        ..ClientOptions::default()
    }
}

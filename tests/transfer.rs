// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Host client and target port talking through a simulated target.

#![cfg(feature = "async")]

mod common;

use common::*;
use swd_serial::Error;
use swd_serial::client::{AsyncSerialClient, ClientOptions, LinkConfig};
use swd_serial::handshake::{DESCRIPTOR_SIGNATURE, LinkEvent, LinkState, MAGIC_BASE};
use swd_serial::port::SerialPort;
use swd_serial::signal::Notifier;

type Client<'a> = AsyncSerialClient<'a, SimTarget, SimTarget, NoDelay>;

fn drain(port: &mut SerialPort<'_, SimTarget, SimTarget>) -> Vec<u8> {
    std::iter::from_fn(|| port.get_next_byte().unwrap()).collect()
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_from_descriptor_and_send() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();
    assert_eq!(sim.register(), MAGIC_BASE);
    assert!(sim.signal_enabled());

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    let descriptor = client.connect().await.unwrap();
    assert_eq!(descriptor.signature, DESCRIPTOR_SIGNATURE);
    assert_eq!(descriptor.rx_base, RX_BASE);
    assert_eq!(descriptor.tx_size as usize, TX_SIZE);
    assert_eq!(client.state(), LinkState::Active);

    assert_eq!(client.write(b"hi\0").await, Ok(3));
    // 'h', 'i', then the zero escaped
    assert_eq!(sim.sram(RX_BASE + 12, 4), vec![0x68, 0x69, 0x80, 0x01]);

    assert_eq!(drain(&mut port), b"hi\0");
    assert_eq!(port.statistics().rx_bytes, 3);
    assert_eq!(client.statistics().tx_bytes, 3);
}

#[tokio::test(flavor = "current_thread")]
async fn test_direct_config_and_receive() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut config = port_config();
    config.descriptor_addr = None;
    let mut port = SerialPort::new(sim.clone(), &notifier, config).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, direct(), options());
    client.connect().await.unwrap();

    assert_eq!(port.write_bytes(b"a\0\x80b"), Ok(4));
    assert_eq!(client.read().await.unwrap(), b"a\0\x80b");
    assert_eq!(client.read().await.unwrap(), b"");
    assert_eq!(port.tx_free(), Ok(127));
}

#[tokio::test(flavor = "current_thread")]
async fn test_receive_across_wrap() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    let mut written = 0;
    let mut received = Vec::new();
    while written < data.len() {
        written += port.write_bytes(&data[written..]).unwrap();
        received.extend(client.read().await.unwrap());
    }
    received.extend(client.read().await.unwrap());

    assert_eq!(received, data);
    assert_eq!(client.statistics().rx_bytes, 300);
    assert_eq!(port.statistics().tx_bytes, 300);
}

#[tokio::test(flavor = "current_thread")]
async fn test_write_backpressure() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    // 16 slots, one always kept free
    let data: Vec<u8> = (1..=20).collect();
    assert_eq!(client.write(&data).await, Ok(15));
    assert_eq!(client.write(&data[15..]).await, Ok(0));

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(port.get_next_byte().unwrap().unwrap());
    }
    assert_eq!(client.write(&data[15..]).await, Ok(5));
    received.extend(drain(&mut port));

    assert_eq!(received, data);
}

#[tokio::test(flavor = "current_thread")]
async fn test_zero_run_through_small_ring() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    assert_eq!(client.write(&[0; 300]).await, Ok(300));
    assert_eq!(sim.sram(RX_BASE + 12, 4), vec![0x80, 255, 0x80, 45]);
    assert_eq!(drain(&mut port), vec![0; 300]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_write_all_and_read_wait() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    client.write_all(b"ping").await.unwrap();
    assert_eq!(drain(&mut port), b"ping");

    port.write_bytes(b"pong").unwrap();
    assert_eq!(client.read_wait().await.unwrap(), b"pong");
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_times_out_without_target() {
    let sim = SimTarget::new();
    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());

    assert_eq!(client.connect().await, Err(Error::NotConnected));
    assert_eq!(client.state(), LinkState::Uninitialized);
    assert_eq!(client.write(b"x").await, Err(Error::NotConnected));
    assert_eq!(client.read().await, Err(Error::NotConnected));
}

#[tokio::test(flavor = "current_thread")]
async fn test_version_mismatch_refused() {
    let sim = SimTarget::new();
    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, direct(), options());

    sim.set_register(0xDB19_6600);
    assert_eq!(client.connect().await, Err(Error::VersionMismatch));
    assert_eq!(client.state(), LinkState::Uninitialized);
    assert_eq!(client.descriptor(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn test_unpublished_descriptor() {
    let sim = SimTarget::new();
    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());

    // Announced, but the descriptor was never written
    sim.set_register(MAGIC_BASE);
    assert_eq!(client.connect().await, Err(Error::Uninit));

    sim.poke_u32(DESCRIPTOR_ADDR, 0x1234_5678);
    assert_eq!(client.connect().await, Err(Error::BadDescriptor));
}

#[tokio::test(flavor = "current_thread")]
async fn test_notify_target_and_activity() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let options = ClientOptions {
        signal_irq: Some(SIGNAL_IRQ),
        notify_on_write: true,
        ..options()
    };
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options);
    client.connect().await.unwrap();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Quiet));

    client.write(b"!").await.unwrap();
    assert!(sim.take_pending(SIGNAL_IRQ));
    notifier.on_signal();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Activity(1)));
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Quiet));

    // Nothing written, nothing raised
    client.write(b"").await.unwrap();
    assert!(!sim.take_pending(SIGNAL_IRQ));

    client.notify_target().await.unwrap();
    assert!(sim.take_pending(SIGNAL_IRQ));

    port.notify_host();
    assert_eq!(sim.host_notifications(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn test_notify_target_needs_irq() {
    let sim = SimTarget::new();
    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, direct(), options());
    assert_eq!(client.notify_target().await, Err(Error::InvalidOperation));
}

#[tokio::test(flavor = "current_thread")]
async fn test_target_reset_drops_link() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    notifier.on_signal();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Activity(1)));

    client.write(b"lost").await.unwrap();
    port.setup().unwrap();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Reset));
    assert_eq!(client.write(b"x").await, Err(Error::NotConnected));

    client.connect().await.unwrap();
    client.write(b"found").await.unwrap();
    assert_eq!(drain(&mut port), b"found");
}

#[tokio::test(flavor = "current_thread")]
async fn test_reset_then_signal_before_poll() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    for _ in 0..3 {
        notifier.on_signal();
    }
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Activity(3)));
    client.write(b"abc").await.unwrap();
    assert_eq!(drain(&mut port), b"abc");

    // The host never sees sequence 0
    port.setup().unwrap();
    notifier.on_signal();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Reset));
    assert_eq!(client.write(b"hello").await, Err(Error::NotConnected));

    client.connect().await.unwrap();
    assert_eq!(client.write(b"hello").await, Ok(5));
    assert_eq!(drain(&mut port), b"hello");
}

#[tokio::test(flavor = "current_thread")]
async fn test_reset_hidden_by_notifications() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let options = ClientOptions {
        signal_irq: Some(SIGNAL_IRQ),
        notify_on_write: true,
        ..options()
    };
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options);
    client.connect().await.unwrap();

    client.write(b"abc").await.unwrap();
    assert!(sim.take_pending(SIGNAL_IRQ));
    notifier.on_signal();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Activity(1)));
    assert_eq!(drain(&mut port), b"abc");

    // Set up again, then the sequence moves forward past where the host
    // last saw it
    port.setup().unwrap();
    notifier.on_signal();
    notifier.on_signal();
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Activity(2)));
    assert_eq!(client.state(), LinkState::Active);

    assert_eq!(client.write(b"hello").await, Err(Error::NotConnected));
    assert_eq!(client.state(), LinkState::Uninitialized);
    assert!(!sim.take_pending(SIGNAL_IRQ));

    client.connect().await.unwrap();
    client.write_all(b"hello").await.unwrap();
    assert_eq!(drain(&mut port), b"hello");
}

#[tokio::test(flavor = "current_thread")]
async fn test_reset_detected_on_read() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    port.write_bytes(b"abc").unwrap();
    assert_eq!(client.read().await.unwrap(), b"abc");

    port.setup().unwrap();
    port.write_bytes(b"xyz").unwrap();
    assert_eq!(client.read().await, Err(Error::NotConnected));

    client.connect().await.unwrap();
    assert_eq!(client.read().await.unwrap(), b"xyz");
}

#[tokio::test(flavor = "current_thread")]
async fn test_beacon_lost() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    sim.set_register(0);
    assert_eq!(client.poll_link().await, Ok(LinkEvent::Lost));
    assert_eq!(client.state(), LinkState::Uninitialized);
    assert_eq!(client.read().await, Err(Error::NotConnected));
}

#[tokio::test(flavor = "current_thread")]
async fn test_corrupt_index_drops_link() {
    let sim = SimTarget::new();
    let notifier = Notifier::new(sim.clone());
    let mut port = SerialPort::new(sim.clone(), &notifier, port_config()).unwrap();
    port.setup().unwrap();

    let (mut reader, mut writer) = (sim.clone(), sim.clone());
    let mut client = Client::new(&mut reader, &mut writer, from_target(), options());
    client.connect().await.unwrap();

    // Tx head lives at offset 4 of the control block
    sim.poke_u32(TX_BASE + 4, 5000);
    assert_eq!(client.read().await, Err(Error::CorruptIndex));
    assert_eq!(client.state(), LinkState::Uninitialized);
    assert_eq!(client.read().await, Err(Error::NotConnected));

    // The target notices too, and starts over
    assert_eq!(port.tx_free(), Err(Error::CorruptIndex));
    assert_eq!(port.tx_free(), Ok(127));
    client.connect().await.unwrap();
    port.write_bytes(b"ok").unwrap();
    assert_eq!(client.read().await.unwrap(), b"ok");
}

#[test]
fn test_link_config_descriptor() {
    let descriptor = direct().direct_descriptor(0x65).unwrap();
    assert_eq!(descriptor.validate(0x65), Ok(()));
    assert_eq!(descriptor.tx_base, TX_BASE);
    assert!(from_target().direct_descriptor(0x65).is_none());
    assert!(matches!(from_target(), LinkConfig::FromTarget { .. }));
}

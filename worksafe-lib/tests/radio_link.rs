//! Tests for the radio hop and the relay

mod common;

use common::*;
use worksafe_lib::clock::ManualClock;
use worksafe_lib::radio::{MemoryRadio, RadioTx, RxFrame, Transceiver};
use worksafe_lib::relay::{Relay, RelayOptions, RelayReceiver, RxOutcome};
use worksafe_lib::serial::RelayFrame;

fn transmitter(air: &MemoryRadio) -> RadioTx<MemoryRadio> {
    RadioTx::init(air.clone(), &RadioConfig::default(), DeviceId::from_name("WS-0042")).unwrap()
}

fn rx(data: &[u8]) -> RxFrame {
    RxFrame {
        data: Bytes::copy_from_slice(data),
        rssi: -95,
        snr: -3.5,
    }
}

#[test]
fn test_frame_counter_wraps_after_65536_frames() {
    let mut air = MemoryRadio::new();
    let mut tx = transmitter(&air);
    let payload = realtime_payload();

    for expected in 0..=u16::MAX {
        assert!(tx.send(&payload));
        let frame = air.receive(0).unwrap();
        let packet = Packet::try_from(frame.data).unwrap();
        assert_eq!(packet.frame_counter, expected);
        assert_eq!(packet.decode_payload().unwrap(), payload);
    }
    assert_eq!(tx.frame_counter(), 0);
}

#[test]
fn test_failed_transmit_keeps_counter() {
    let air = MemoryRadio::new();
    let mut tx = transmitter(&air);
    air.fail_transmits(2);

    assert!(!tx.send(&realtime_payload()));
    assert!(!tx.send(&realtime_payload()));
    assert_eq!(tx.frame_counter(), 0);
    assert!(tx.send(&realtime_payload()));
    assert_eq!(tx.frame_counter(), 1);
    assert_eq!(air.pending(), 1);
}

#[test]
fn test_bad_radio_config_is_init_error() {
    let config = RadioConfig {
        coding_rate: 9,
        ..RadioConfig::default()
    };
    let result = RadioTx::init(MemoryRadio::new(), &config, DeviceId::from_name("WS-0042"));
    assert!(matches!(result, Err(WsError::RadioInit(_))));
}

#[test]
fn test_repeated_malformed_packet_counted_once() {
    let mut receiver = RelayReceiver::new();
    let garbage = hex_to_bytes("5753ff00");

    let first = receiver.accept(rx(&garbage));
    let second = receiver.accept(rx(&garbage));
    assert!(matches!(first, RxOutcome::Invalid { duplicate: false, .. }));
    assert!(matches!(second, RxOutcome::Invalid { duplicate: true, .. }));
    assert_eq!(receiver.stats().skipped, 1);

    // Unknown packet type 0x09 in an otherwise complete header
    let unknown = hex_to_bytes("57532d303034320000000a0009");
    receiver.accept(rx(&unknown));
    assert_eq!(receiver.stats().skipped, 2);
    assert!(receiver.last_valid().is_none());
}

#[test]
fn test_realtime_relay_frame_layout() {
    let payload = realtime_payload().encode().unwrap();
    assert_eq!(payload.len(), 10);

    let frame = RelayFrame::new(payload.clone(), -95, -3.5).unwrap();
    let wire = frame.encode();
    assert_eq!(wire.len(), 15);
    assert_eq!(wire[0], 0xAA);
    assert_eq!(wire[1], 0x0A);
    assert_eq!(wire[2], 55);
    assert_eq!(wire[3], 16);
    assert_eq!(&wire[4..14], payload.as_ref());
    assert_eq!(wire[14], 0x55);

    assert_eq!(frame.rssi(), -95);
    assert_eq!(frame.snr(), -4);
}

#[test]
fn test_relay_forwards_new_and_repeated_frames() {
    let air = MemoryRadio::new().with_signal(-88, 4.0);
    let mut tx = transmitter(&air);
    let clock = ManualClock::new(0);
    let mut relay = Relay::init(
        air.clone(),
        &RadioConfig::default(),
        Vec::new(),
        &clock,
        RelayOptions::default(),
    )
    .unwrap();

    assert!(tx.send(&realtime_payload()));
    let first = relay.radio_mut().receive(0).unwrap();
    // Hear the same frame twice, then some noise
    relay.radio_mut().inject(first.data.clone());
    relay.radio_mut().inject(first.data.clone());
    relay.radio_mut().inject(Bytes::from_static(&[0x01, 0x02]));

    assert!(matches!(relay.poll().unwrap(), Some(RxOutcome::New(_))));
    assert!(matches!(relay.poll().unwrap(), Some(RxOutcome::Repeat(_))));
    assert!(matches!(relay.poll().unwrap(), Some(RxOutcome::Invalid { .. })));
    assert!(relay.poll().unwrap().is_none());

    let stats = relay.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.repeats, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.forwarded, 2);
    assert_eq!(relay.serial().len(), 2 * (first.data.len() + 5));
}

#[test]
fn test_relay_can_drop_repeats() {
    let air = MemoryRadio::new();
    let mut tx = transmitter(&air);
    let options = RelayOptions {
        forward_repeats: false,
        ..RelayOptions::default()
    };
    let mut relay = Relay::init(
        air.clone(),
        &RadioConfig::default(),
        Vec::new(),
        ManualClock::new(0),
        options,
    )
    .unwrap();

    assert!(tx.send(&realtime_payload()));
    let frame = relay.radio_mut().receive(0).unwrap();
    relay.radio_mut().inject(frame.data.clone());
    relay.radio_mut().inject(frame.data);
    relay.poll().unwrap();
    relay.poll().unwrap();

    assert_eq!(relay.stats().forwarded, 1);
    assert_eq!(relay.stats().repeats, 1);
}

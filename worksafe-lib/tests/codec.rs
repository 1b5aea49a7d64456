//! Tests for payload encoding

mod common;

use common::*;
use worksafe_lib::ecg::EcgProcessor;
use worksafe_lib::payload::{FallEventPayload, decode_temperature, encode_temperature};

#[test]
fn test_temperature_round_trip_within_resolution() {
    let mut temp = -20.0f32;
    while temp <= 80.0 {
        let decoded = decode_temperature(encode_temperature(temp));
        assert!(
            (decoded - temp).abs() <= 0.2,
            "{:.1} °C came back as {:.3} °C",
            temp,
            decoded
        );
        temp += 0.4;
    }
}

#[test]
fn test_temperature_saturates_outside_range() {
    assert_eq!(encode_temperature(-40.0), 0);
    assert_eq!(encode_temperature(150.0), 255);
    assert_eq!(encode_temperature(f32::NAN), 0);
}

#[test]
fn test_realtime_from_capture() {
    // 72 bpm, WARNING, fall and noise alerts, 88 dB
    let bytes = hex_to_bytes("0148917358010c000000");
    let Payload::Realtime(realtime) = Payload::decode(&bytes).unwrap() else {
        panic!("expected realtime payload");
    };
    assert_eq!(realtime.heart_rate, 72);
    assert!((realtime.body_temp_c - 36.8).abs() <= 0.2);
    assert!((realtime.ambient_temp_c - 25.0).abs() <= 0.2);
    assert_eq!(realtime.noise_db, 88);
    assert_eq!(realtime.fall_state, FallState::Warning);
    assert!(realtime.alerts.fall());
    assert!(realtime.alerts.noise());
    assert!(!realtime.alerts.heart_rate());
    assert!(!realtime.alerts.temperature());
}

#[test]
fn test_realtime_rejects_bad_fall_state() {
    let bytes = hex_to_bytes("01489073400701000000");
    assert!(matches!(
        Payload::decode(&bytes),
        Err(WsError::InvalidFallState(7))
    ));
}

#[test]
fn test_payloads_need_exact_length() {
    let realtime = realtime_payload().encode().unwrap();
    let mut long = realtime.to_vec();
    long.push(0);
    assert!(Payload::decode(&long).is_err());
    assert!(Payload::decode(&realtime[..9]).is_err());
    assert!(Payload::decode(&[]).is_err());
}

#[test]
fn test_ecg_payload_from_processor() {
    let mut ecg = EcgProcessor::new(&VitalThresholds::default());
    let mut t = 0;
    for i in 0..500u64 {
        let value = if i % 80 == 40 { 3000 } else { 2048 };
        ecg.push(Some(value), t);
        t += 10;
    }
    assert_eq!(ecg.bpm(), 75);

    let payload = ecg.payload();
    let bytes = payload.encode().unwrap();
    assert_eq!(bytes.len(), 65);
    assert_eq!(bytes[0], u8::from(PacketType::Ecg));
    assert_eq!(Payload::decode(&bytes).unwrap(), Payload::Ecg(payload));

    // Differences rebuild a waveform that returns to the flat baseline
    let waveform = payload.reconstruct(2048);
    assert_eq!(waveform.len(), 50);
    assert!(waveform.iter().all(|&v| (1024..=4096).contains(&v)));
}

#[test]
fn test_fall_event_from_detector() {
    let event = FallEvent {
        state: FallState::FallDetected,
        timestamp_ms: 123_456,
        svm: 2.7,
        angular_velocity: 215.0,
        pitch: 71.5,
        roll: -12.25,
        impact_count: 4,
        warning_count: 2,
        confirmed: true,
        accel: [1.5, -3.0, 26.0],
        ..FallEvent::default()
    };
    let payload = FallEventPayload::from_event(&event, 96, 37.0);
    let bytes = payload.encode().unwrap();
    assert_eq!(bytes.len(), 45);
    assert_eq!(&bytes[1..5], &123_456u32.to_le_bytes());

    let Payload::FallEvent(decoded) = Payload::decode(&bytes).unwrap() else {
        panic!("expected fall event payload");
    };
    assert_eq!(decoded.impact_count, 4);
    assert_eq!(decoded.heart_rate, 96);
    assert_eq!(decoded.accel, [1.5, -3.0, 26.0]);
    assert_eq!(decoded.angular_velocity, 215.0);
    assert!((decoded.body_temp_c - 37.0).abs() <= 0.2);
}

#[test]
fn test_payload_json_shape() {
    let json = serde_json::to_value(realtime_payload()).unwrap();
    assert_eq!(json["kind"], "realtime");
    assert_eq!(json["heart_rate"], 82);
    assert_eq!(json["fall_state"], "NORMAL");
}

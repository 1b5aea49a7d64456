//! Fixed-width payloads carried inside radio packets.
//!
//! | type | size | content                                        |
//! |------|------|------------------------------------------------|
//! | 1    | 10   | realtime vitals, fall state, alert bits        |
//! | 2    | 65   | compressed ECG strip + PQRST features          |
//! | 3    | 45   | fall event snapshot                            |
//!
//! Multi-byte fields are little-endian except the PQRST block, which the
//! wearable writes big-endian.

use crate::constants::{
    COMPRESSED_ECG_SIZE, ECG_PAYLOAD_SIZE, FALL_EVENT_PAYLOAD_SIZE, REALTIME_PAYLOAD_SIZE,
    TEMP_MIN_C, TEMP_SPAN_C,
};
use crate::error::WsError;
use crate::fall::{FallEvent, FallState};
use crate::packet::PacketType;
use crate::schema::{Endian, Field, FieldKind, Record, Schema, Value};
use bytes::Bytes;
use modular_bitfield::prelude::*;
use serde::{Serialize, Serializer};
use strum_macros::Display;

const LE: Endian = Endian::Little;
const BE: Endian = Endian::Big;

pub static REALTIME_SCHEMA: Schema = Schema {
    name: "realtime",
    size: REALTIME_PAYLOAD_SIZE,
    fields: &[
        Field::new("type", 0, FieldKind::U8),
        Field::new("heart_rate", 1, FieldKind::U8),
        Field::new("body_temp", 2, FieldKind::U8),
        Field::new("ambient_temp", 3, FieldKind::U8),
        Field::new("noise", 4, FieldKind::U8),
        Field::new("fall_state", 5, FieldKind::U8),
        Field::new("alerts", 6, FieldKind::U8),
        // Filled in by the receiver, always zero on air
        Field::new("rssi", 7, FieldKind::I16(LE)),
        Field::new("snr", 9, FieldKind::I8),
    ],
};

pub static ECG_SCHEMA: Schema = Schema {
    name: "ecg",
    size: ECG_PAYLOAD_SIZE,
    fields: &[
        Field::new("type", 0, FieldKind::U8),
        Field::new("samples", 1, FieldKind::Bytes(COMPRESSED_ECG_SIZE)),
        Field::new("pqrst_timestamp", 51, FieldKind::U16(BE)),
        Field::new("p", 53, FieldKind::I16(BE)),
        Field::new("q", 55, FieldKind::I16(BE)),
        Field::new("r", 57, FieldKind::I16(BE)),
        Field::new("s", 59, FieldKind::I16(BE)),
        Field::new("t", 61, FieldKind::I16(BE)),
        Field::new("qrs_width", 63, FieldKind::U8),
        Field::new("qt_interval", 64, FieldKind::U8),
    ],
};

pub static FALL_EVENT_SCHEMA: Schema = Schema {
    name: "fall_event",
    size: FALL_EVENT_PAYLOAD_SIZE,
    fields: &[
        Field::new("type", 0, FieldKind::U8),
        Field::new("timestamp", 1, FieldKind::U32(LE)),
        Field::new("jerk", 5, FieldKind::F32(LE)),
        Field::new("svm", 9, FieldKind::F32(LE)),
        Field::new("angular_velocity", 13, FieldKind::F32(LE)),
        Field::new("pitch", 17, FieldKind::F32(LE)),
        Field::new("roll", 21, FieldKind::F32(LE)),
        Field::new("impact_count", 25, FieldKind::U8),
        Field::new("warning_count", 26, FieldKind::U8),
        Field::new("heart_rate", 27, FieldKind::U8),
        Field::new("body_temp", 28, FieldKind::U8),
        Field::new("accel_x", 29, FieldKind::F32(LE)),
        Field::new("accel_y", 33, FieldKind::F32(LE)),
        Field::new("accel_z", 37, FieldKind::F32(LE)),
        Field::new("movement_variance", 41, FieldKind::F32(LE)),
    ],
};

/// Map °C in [-20, 80] onto a byte. Out-of-range values saturate.
pub fn encode_temperature(temp_c: f32) -> u8 {
    let scaled = ((temp_c - TEMP_MIN_C) / TEMP_SPAN_C * 255.0).round();
    // NaN casts to 0
    scaled.clamp(0.0, 255.0) as u8
}

pub fn decode_temperature(encoded: u8) -> f32 {
    encoded as f32 / 255.0 * TEMP_SPAN_C + TEMP_MIN_C
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertCategory {
    HeartRate,
    Temperature,
    Fall,
    Noise,
}

#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertFlags {
    pub heart_rate: bool,
    pub temperature: bool,
    pub fall: bool,
    pub noise: bool,
    #[skip]
    reserved: B4,
}

impl AlertFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self::from_bytes([byte])
    }

    pub fn to_byte(self) -> u8 {
        self.into_bytes()[0]
    }

    pub fn any(&self) -> bool {
        self.heart_rate() || self.temperature() || self.fall() || self.noise()
    }

    pub fn categories(&self) -> Vec<AlertCategory> {
        [
            (self.heart_rate(), AlertCategory::HeartRate),
            (self.temperature(), AlertCategory::Temperature),
            (self.fall(), AlertCategory::Fall),
            (self.noise(), AlertCategory::Noise),
        ]
        .into_iter()
        .filter_map(|(set, category)| set.then_some(category))
        .collect()
    }
}

impl Serialize for AlertFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.categories())
    }
}

fn check_type(record: &Record, expected: PacketType) -> Result<(), WsError> {
    let found = record.u8("type")?;
    if found != u8::from(expected) {
        return Err(WsError::InvalidPacket(format!(
            "{} payload carries type byte {}",
            expected, found
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RealtimePayload {
    pub heart_rate: u8,
    pub body_temp_c: f32,
    pub ambient_temp_c: f32,
    /// dB, saturated to a byte
    pub noise_db: u8,
    pub fall_state: FallState,
    pub alerts: AlertFlags,
    pub rssi: i16,
    pub snr: i8,
}

impl RealtimePayload {
    pub fn encode(&self) -> Result<Bytes, WsError> {
        REALTIME_SCHEMA.encode(&[
            Value::U8(PacketType::Realtime.into()),
            Value::U8(self.heart_rate),
            Value::U8(encode_temperature(self.body_temp_c)),
            Value::U8(encode_temperature(self.ambient_temp_c)),
            Value::U8(self.noise_db),
            Value::U8(self.fall_state.into()),
            Value::U8(self.alerts.to_byte()),
            Value::I16(self.rssi),
            Value::I8(self.snr),
        ])
    }

    pub fn decode(data: &[u8]) -> Result<Self, WsError> {
        let record = REALTIME_SCHEMA.decode(data)?;
        check_type(&record, PacketType::Realtime)?;
        let state = record.u8("fall_state")?;
        Ok(Self {
            heart_rate: record.u8("heart_rate")?,
            body_temp_c: decode_temperature(record.u8("body_temp")?),
            ambient_temp_c: decode_temperature(record.u8("ambient_temp")?),
            noise_db: record.u8("noise")?,
            fall_state: FallState::try_from(state).map_err(|_| WsError::InvalidFallState(state))?,
            alerts: AlertFlags::from_byte(record.u8("alerts")?),
            rssi: record.i16("rssi")?,
            snr: record.i8("snr")?,
        })
    }
}

/// ECG beat morphology. Amplitudes are relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pqrst {
    /// Low 16 bits of the R peak time (ms)
    pub timestamp: u16,
    pub p: i16,
    pub q: i16,
    pub r: i16,
    pub s: i16,
    pub t: i16,
    pub qrs_width_ms: u8,
    pub qt_interval_ms: u8,
}

fn serialize_hex<S: Serializer>(bytes: &[u8; COMPRESSED_ECG_SIZE], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EcgPayload {
    /// Differential samples, oldest first, 128 = no change
    #[serde(serialize_with = "serialize_hex")]
    pub samples: [u8; COMPRESSED_ECG_SIZE],
    /// All zero when no beat was extracted
    pub pqrst: Pqrst,
}

impl EcgPayload {
    pub fn encode(&self) -> Result<Bytes, WsError> {
        let p = &self.pqrst;
        ECG_SCHEMA.encode(&[
            Value::U8(PacketType::Ecg.into()),
            Value::Bytes(Bytes::copy_from_slice(&self.samples)),
            Value::U16(p.timestamp),
            Value::I16(p.p),
            Value::I16(p.q),
            Value::I16(p.r),
            Value::I16(p.s),
            Value::I16(p.t),
            Value::U8(p.qrs_width_ms),
            Value::U8(p.qt_interval_ms),
        ])
    }

    pub fn decode(data: &[u8]) -> Result<Self, WsError> {
        let record = ECG_SCHEMA.decode(data)?;
        check_type(&record, PacketType::Ecg)?;
        let samples: [u8; COMPRESSED_ECG_SIZE] = record.bytes("samples")?.as_ref().try_into()?;
        Ok(Self {
            samples,
            pqrst: Pqrst {
                timestamp: record.u16("pqrst_timestamp")?,
                p: record.i16("p")?,
                q: record.i16("q")?,
                r: record.i16("r")?,
                s: record.i16("s")?,
                t: record.i16("t")?,
                qrs_width_ms: record.u8("qrs_width")?,
                qt_interval_ms: record.u8("qt_interval")?,
            },
        })
    }

    /// Rebuild the downsampled waveform from a starting ADC value.
    pub fn reconstruct(&self, start: i32) -> Vec<i32> {
        self.samples
            .iter()
            .scan(start, |value, &diff| {
                *value += (diff as i32 - 128) * 4;
                Some(*value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FallEventPayload {
    /// Device uptime in ms, wrapping at 2^32
    pub timestamp_ms: u32,
    pub jerk: f32,
    pub svm: f32,
    pub angular_velocity: f32,
    pub pitch: f32,
    pub roll: f32,
    pub impact_count: u8,
    pub warning_count: u8,
    pub heart_rate: u8,
    pub body_temp_c: f32,
    pub accel: [f32; 3],
    pub movement_variance: f32,
}

impl FallEventPayload {
    pub fn from_event(event: &FallEvent, heart_rate: u8, body_temp_c: f32) -> Self {
        Self {
            timestamp_ms: event.timestamp_ms as u32,
            jerk: event.jerk,
            svm: event.svm,
            angular_velocity: event.angular_velocity,
            pitch: event.pitch,
            roll: event.roll,
            impact_count: event.impact_count,
            warning_count: event.warning_count,
            heart_rate,
            body_temp_c,
            accel: event.accel,
            movement_variance: event.movement_variance,
        }
    }

    pub fn encode(&self) -> Result<Bytes, WsError> {
        FALL_EVENT_SCHEMA.encode(&[
            Value::U8(PacketType::FallEvent.into()),
            Value::U32(self.timestamp_ms),
            Value::F32(self.jerk),
            Value::F32(self.svm),
            Value::F32(self.angular_velocity),
            Value::F32(self.pitch),
            Value::F32(self.roll),
            Value::U8(self.impact_count),
            Value::U8(self.warning_count),
            Value::U8(self.heart_rate),
            Value::U8(encode_temperature(self.body_temp_c)),
            Value::F32(self.accel[0]),
            Value::F32(self.accel[1]),
            Value::F32(self.accel[2]),
            Value::F32(self.movement_variance),
        ])
    }

    pub fn decode(data: &[u8]) -> Result<Self, WsError> {
        let record = FALL_EVENT_SCHEMA.decode(data)?;
        check_type(&record, PacketType::FallEvent)?;
        Ok(Self {
            timestamp_ms: record.u32("timestamp")?,
            jerk: record.f32("jerk")?,
            svm: record.f32("svm")?,
            angular_velocity: record.f32("angular_velocity")?,
            pitch: record.f32("pitch")?,
            roll: record.f32("roll")?,
            impact_count: record.u8("impact_count")?,
            warning_count: record.u8("warning_count")?,
            heart_rate: record.u8("heart_rate")?,
            body_temp_c: decode_temperature(record.u8("body_temp")?),
            accel: [
                record.f32("accel_x")?,
                record.f32("accel_y")?,
                record.f32("accel_z")?,
            ],
            movement_variance: record.f32("movement_variance")?,
        })
    }
}

/// Any decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Realtime(RealtimePayload),
    Ecg(EcgPayload),
    FallEvent(FallEventPayload),
}

impl Payload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Realtime(_) => PacketType::Realtime,
            Payload::Ecg(_) => PacketType::Ecg,
            Payload::FallEvent(_) => PacketType::FallEvent,
        }
    }

    pub fn encode(&self) -> Result<Bytes, WsError> {
        match self {
            Payload::Realtime(p) => p.encode(),
            Payload::Ecg(p) => p.encode(),
            Payload::FallEvent(p) => p.encode(),
        }
    }

    /// Decode a payload, dispatching on its leading type byte.
    pub fn decode(data: &[u8]) -> Result<Self, WsError> {
        let type_byte = *data.first().ok_or(WsError::InsufficientData {
            expected: 1,
            actual: 0,
        })?;
        let packet_type =
            PacketType::try_from(type_byte).map_err(|_| WsError::UnknownPacketType(type_byte))?;
        Self::decode_as(packet_type, data)
    }

    pub fn decode_as(packet_type: PacketType, data: &[u8]) -> Result<Self, WsError> {
        Ok(match packet_type {
            PacketType::Realtime => Payload::Realtime(RealtimePayload::decode(data)?),
            PacketType::Ecg => Payload::Ecg(EcgPayload::decode(data)?),
            PacketType::FallEvent => Payload::FallEvent(FallEventPayload::decode(data)?),
        })
    }

    /// Alert bits, when the payload carries them.
    pub fn alerts(&self) -> Option<AlertFlags> {
        match self {
            Payload::Realtime(p) => Some(p.alerts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_are_contiguous() {
        REALTIME_SCHEMA.check_layout().unwrap();
        ECG_SCHEMA.check_layout().unwrap();
        FALL_EVENT_SCHEMA.check_layout().unwrap();
    }

    #[test]
    fn test_temperature_edges() {
        assert_eq!(encode_temperature(-20.0), 0);
        assert_eq!(encode_temperature(80.0), 255);
        assert_eq!(encode_temperature(-40.0), 0);
        assert_eq!(encode_temperature(120.0), 255);
        assert_eq!(encode_temperature(f32::NAN), 0);
        // 36.5 °C -> 144.075 -> 144
        assert_eq!(encode_temperature(36.5), 144);
    }

    #[test]
    fn test_alert_bits() {
        let flags = AlertFlags::new().with_fall(true).with_noise(true);
        assert_eq!(flags.to_byte(), 0b1100);
        assert_eq!(
            flags.categories(),
            vec![AlertCategory::Fall, AlertCategory::Noise]
        );
        assert!(!AlertFlags::from_byte(0xF0).any(), "reserved bits are ignored");
    }

    #[test]
    fn test_realtime_layout() {
        let payload = RealtimePayload {
            heart_rate: 72,
            body_temp_c: 36.5,
            ambient_temp_c: 25.0,
            noise_db: 64,
            fall_state: FallState::Warning,
            alerts: AlertFlags::new().with_heart_rate(true),
            rssi: 0,
            snr: 0,
        };
        let bytes = payload.encode().unwrap();
        // 25 °C -> 114.75 -> 115 (0x73)
        assert_eq!(hex::encode(&bytes), "01489073400101000000");
        assert_eq!(RealtimePayload::decode(&bytes).unwrap().fall_state, FallState::Warning);
    }

    #[test]
    fn test_pqrst_is_big_endian() {
        let payload = EcgPayload {
            samples: [128; COMPRESSED_ECG_SIZE],
            pqrst: Pqrst {
                timestamp: 0x0102,
                p: 0x0304,
                q: -1,
                r: 0,
                s: 0,
                t: 0,
                qrs_width_ms: 90,
                qt_interval_ms: 200,
            },
        };
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes.len(), ECG_PAYLOAD_SIZE);
        assert_eq!(&bytes[51..57], &[0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF]);
        assert_eq!(EcgPayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_reconstruct_from_differences() {
        let mut samples = [128u8; COMPRESSED_ECG_SIZE];
        samples[0] = 138; // +40
        samples[1] = 118; // -40
        let payload = EcgPayload {
            samples,
            pqrst: Pqrst::default(),
        };
        let wave = payload.reconstruct(2048);
        assert_eq!(&wave[..3], &[2088, 2048, 2048]);
    }

    #[test]
    fn test_fall_event_offsets() {
        let payload = FallEventPayload {
            timestamp_ms: 0xAABBCCDD,
            jerk: 1.0,
            svm: 2.5,
            angular_velocity: 150.0,
            pitch: -10.0,
            roll: 5.0,
            impact_count: 4,
            warning_count: 1,
            heart_rate: 88,
            body_temp_c: 36.5,
            accel: [0.0, 0.0, 9.8],
            movement_variance: 0.001,
        };
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes.len(), FALL_EVENT_PAYLOAD_SIZE);
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..5], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&bytes[5..9], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[25..29], &[4, 1, 88, 144]);
        assert_eq!(&bytes[37..41], &9.8f32.to_le_bytes());
        let decoded = FallEventPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.accel, payload.accel);
        assert_eq!(decoded.impact_count, 4);
    }

    #[test]
    fn test_decode_rejects_type_and_state() {
        let mut bytes = [0u8; REALTIME_PAYLOAD_SIZE];
        bytes[0] = 2;
        assert!(RealtimePayload::decode(&bytes).is_err());
        bytes[0] = 1;
        bytes[5] = 9;
        assert!(matches!(
            RealtimePayload::decode(&bytes),
            Err(WsError::InvalidFallState(9))
        ));
        assert!(matches!(
            Payload::decode(&[7u8; 10]),
            Err(WsError::UnknownPacketType(7))
        ));
    }
}

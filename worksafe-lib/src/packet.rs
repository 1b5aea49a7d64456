use crate::constants::{DEVICE_ID_SIZE, MAX_RADIO_FRAME_SIZE, RADIO_HEADER_SIZE};
use crate::error::WsError;
use crate::payload::Payload;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Serialize, Serializer};
use std::fmt;
use strum_macros::Display;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketType {
    #[strum(to_string = "Realtime")]
    Realtime = 1,
    #[strum(to_string = "ECG")]
    Ecg = 2,
    #[strum(to_string = "Fall Event")]
    FallEvent = 3,
}

impl PacketType {
    /// Fixed payload length for this type, type byte included
    pub fn payload_size(&self) -> usize {
        use crate::constants::*;
        match self {
            PacketType::Realtime => REALTIME_PAYLOAD_SIZE,
            PacketType::Ecg => ECG_PAYLOAD_SIZE,
            PacketType::FallEvent => FALL_EVENT_PAYLOAD_SIZE,
        }
    }
}

// Serialized as the numeric type, which is what the ingestion API keys on
impl Serialize for PacketType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8((*self).into())
    }
}

/// 10-byte device identifier, zero padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId([u8; DEVICE_ID_SIZE]);

impl DeviceId {
    pub fn from_bytes(bytes: [u8; DEVICE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Zero-pads short names and truncates long ones.
    pub fn from_name(name: &str) -> Self {
        let mut id = [0u8; DEVICE_ID_SIZE];
        let raw = name.as_bytes();
        let len = raw.len().min(DEVICE_ID_SIZE);
        id[..len].copy_from_slice(&raw[..len]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    /// Printable text with NULs and undecodable bytes removed, or lowercase
    /// hex when nothing is left.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = String::from_utf8_lossy(&self.0)
            .chars()
            .filter(|c| *c != '\0' && *c != char::REPLACEMENT_CHARACTER)
            .collect();
        let text = text.trim();
        if text.is_empty() {
            write!(f, "{}", hex::encode(self.0))
        } else {
            write!(f, "{}", text)
        }
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self)
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Radio header as laid out on air.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct RadioHeaderRaw {
    pub device_id: [u8; DEVICE_ID_SIZE],
    pub frame_counter: U16,
    pub packet_type: u8,
}

/// A radio frame: header plus an opaque payload.
///
/// Only the header is validated here. The payload is checked when it is
/// decoded with [`Packet::decode_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub device_id: DeviceId,
    pub frame_counter: u16,
    pub packet_type: PacketType,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(device_id: DeviceId, frame_counter: u16, payload: &Payload) -> Result<Self, WsError> {
        Ok(Self {
            device_id,
            frame_counter,
            packet_type: payload.packet_type(),
            payload: payload.encode()?,
        })
    }

    /// Size on air, header included.
    pub fn wire_len(&self) -> usize {
        RADIO_HEADER_SIZE + self.payload.len()
    }

    pub fn header(&self) -> RadioHeaderRaw {
        RadioHeaderRaw {
            device_id: *self.device_id.as_bytes(),
            frame_counter: U16::new(self.frame_counter),
            packet_type: self.packet_type.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, WsError> {
        let size = self.wire_len();
        if size > MAX_RADIO_FRAME_SIZE {
            return Err(WsError::FrameTooLarge {
                size,
                max: MAX_RADIO_FRAME_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(self.header().as_bytes());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn decode_payload(&self) -> Result<Payload, WsError> {
        let expected = self.packet_type.payload_size();
        if self.payload.len() != expected {
            return Err(WsError::InvalidLength {
                expected,
                actual: self.payload.len(),
            });
        }
        Payload::decode_as(self.packet_type, &self.payload)
    }
}

impl TryFrom<Bytes> for Packet {
    type Error = WsError;

    fn try_from(mut bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() > MAX_RADIO_FRAME_SIZE {
            return Err(WsError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_RADIO_FRAME_SIZE,
            });
        }
        let (header, _) = RadioHeaderRaw::read_from_prefix(&bytes).map_err(|_| {
            WsError::InsufficientData {
                expected: RADIO_HEADER_SIZE,
                actual: bytes.len(),
            }
        })?;
        let packet_type = PacketType::try_from(header.packet_type)
            .map_err(|_| WsError::UnknownPacketType(header.packet_type))?;
        let payload = bytes.split_off(RADIO_HEADER_SIZE);

        Ok(Packet {
            device_id: DeviceId::from_bytes(header.device_id),
            frame_counter: header.frame_counter.get(),
            packet_type,
            payload,
        })
    }
}

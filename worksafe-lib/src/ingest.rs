//! Records handed to the external ingestion service.

use crate::error::WsError;
use crate::packet::Packet;
use crate::payload::{AlertCategory, Payload};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Endpoint the gateway posts records to.
pub const INGEST_PATH: &str = "/api/sensor-data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub device_id: String,
    pub packet_type: u8,
    /// Base64 of the payload exactly as received
    pub data: String,
    /// Local time of reception
    pub timestamp: NaiveDateTime,
    pub frame_counter: u16,
    /// dBm
    pub rssi: i16,
}

impl IngestRecord {
    pub fn new(packet: &Packet, rssi: i16, timestamp: NaiveDateTime) -> Self {
        Self {
            device_id: packet.device_id.to_string(),
            packet_type: packet.packet_type.into(),
            data: STANDARD.encode(&packet.payload),
            timestamp,
            frame_counter: packet.frame_counter,
            rssi,
        }
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>, WsError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| WsError::InvalidPacket(format!("bad base64 payload: {e}")))
    }

    pub fn decode_payload(&self) -> Result<Payload, WsError> {
        Payload::decode(&self.payload_bytes()?)
    }

    /// Alert categories for the notifier. Only realtime packets carry alerts.
    pub fn alert_categories(&self) -> Result<Vec<AlertCategory>, WsError> {
        Ok(self
            .decode_payload()?
            .alerts()
            .map(|flags| flags.categories())
            .unwrap_or_default())
    }

    pub fn to_json(&self) -> Result<String, WsError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DeviceId, PacketType};
    use bytes::Bytes;
    use chrono::NaiveDate;

    #[test]
    fn test_record_shape() {
        let packet = Packet {
            device_id: DeviceId::from_name("HELMET-07"),
            frame_counter: 513,
            packet_type: PacketType::Realtime,
            payload: Bytes::from_static(&[1, 72, 144, 115, 64, 0, 0b0101, 0, 0, 0]),
        };
        let ts = NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 6)
            .unwrap();
        let record = IngestRecord::new(&packet, -71, ts);

        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["device_id"], "HELMET-07");
        assert_eq!(json["packet_type"], 1);
        assert_eq!(json["data"], "AUiQc0AABQAAAA==");
        assert_eq!(json["timestamp"], "2025-01-02T03:04:05.000006");
        assert_eq!(json["frame_counter"], 513);
        assert_eq!(json["rssi"], -71);

        assert_eq!(
            record.alert_categories().unwrap(),
            vec![AlertCategory::HeartRate, AlertCategory::Fall]
        );
    }
}

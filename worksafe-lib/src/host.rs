//! Gateway host side of the serial hop.

use crate::constants::RADIO_HEADER_SIZE;
use crate::ingest::IngestRecord;
use crate::packet::Packet;
use crate::serial::{SerialDecoder, SerialEvent, TimeSync};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

/// A packet recovered from the serial stream with its signal quality.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub packet: Packet,
    /// dBm
    pub rssi: i16,
    /// dB
    pub snr: i16,
}

impl ReceivedFrame {
    pub fn to_record(&self, timestamp: NaiveDateTime) -> IngestRecord {
        IngestRecord::new(&self.packet, self.rssi, timestamp)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub packets_received: u64,
    /// Well-framed data that was not a valid packet
    pub parse_errors: u64,
    pub frame_errors: u64,
    pub skipped_bytes: u64,
}

#[derive(Debug)]
pub struct HostReceiver {
    decoder: SerialDecoder,
    packets_received: u64,
    parse_errors: u64,
}

impl Default for HostReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostReceiver {
    pub fn new() -> Self {
        Self {
            decoder: SerialDecoder::new().with_min_frame_len(RADIO_HEADER_SIZE),
            packets_received: 0,
            parse_errors: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.decoder.push(data);
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Drop one byte of a stalled partial frame so decoding can resume.
    pub fn expire_partial(&mut self) -> bool {
        self.decoder.expire_partial()
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            packets_received: self.packets_received,
            parse_errors: self.parse_errors,
            frame_errors: self.decoder.frame_errors(),
            skipped_bytes: self.decoder.skipped_bytes(),
        }
    }

    /// Next valid packet from the buffered stream.
    pub fn next_frame(&mut self) -> Option<ReceivedFrame> {
        loop {
            match self.decoder.next_event()? {
                SerialEvent::Frame(frame) => match Packet::try_from(frame.payload().clone()) {
                    Ok(packet) => {
                        self.packets_received += 1;
                        info!(
                            "Packet #{} from {}: {} frame {}, {} bytes, RSSI {} dBm, SNR {} dB",
                            self.packets_received,
                            packet.device_id,
                            packet.packet_type,
                            packet.frame_counter,
                            packet.payload.len(),
                            frame.rssi(),
                            frame.snr()
                        );
                        return Some(ReceivedFrame {
                            packet,
                            rssi: frame.rssi(),
                            snr: frame.snr(),
                        });
                    }
                    Err(e) => {
                        self.parse_errors += 1;
                        warn!("Dropping relayed frame: {}", e);
                    }
                },
                SerialEvent::TimeSync(sync) => {
                    debug!("Ignoring echoed time sync {}", sync);
                }
            }
        }
    }
}

/// Time sync message for the current local time.
pub fn time_sync_now() -> [u8; crate::constants::TIME_SYNC_SIZE] {
    TimeSync::from_datetime(&chrono::Local::now().naive_local()).encode()
}

//! Serial hop between the relay and the gateway host.
//!
//! Relay to host: `[0xAA][len][rssi+150][snr+20][payload; len][0x55]`.
//! Host to relay, at any time: `[0xFF][0xFE][yearHi][yearLo][mon][day][h][m][s][0xFD]`.

use crate::constants::{
    MAX_RADIO_FRAME_SIZE, RELAY_END, RELAY_OVERHEAD, RELAY_START, RSSI_OFFSET, SNR_OFFSET,
    TIME_SYNC_END, TIME_SYNC_LEAD, TIME_SYNC_SECOND, TIME_SYNC_SIZE,
};
use crate::error::WsError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;
use tracing::{debug, warn};

/// A radio packet re-framed for the serial line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    rssi_byte: u8,
    snr_byte: u8,
    payload: Bytes,
}

impl RelayFrame {
    /// Signal values are offset into bytes and saturate at the byte range.
    pub fn new(payload: Bytes, rssi: i16, snr: f32) -> Result<Self, WsError> {
        if payload.len() > MAX_RADIO_FRAME_SIZE {
            return Err(WsError::FrameTooLarge {
                size: payload.len(),
                max: MAX_RADIO_FRAME_SIZE,
            });
        }
        Ok(Self {
            rssi_byte: rssi.saturating_add(RSSI_OFFSET).clamp(0, 255) as u8,
            snr_byte: (snr + SNR_OFFSET).clamp(0.0, 255.0) as u8,
            payload,
        })
    }

    pub fn from_raw(rssi_byte: u8, snr_byte: u8, payload: Bytes) -> Self {
        Self {
            rssi_byte,
            snr_byte,
            payload,
        }
    }

    /// dBm
    pub fn rssi(&self) -> i16 {
        self.rssi_byte as i16 - RSSI_OFFSET
    }

    /// dB
    pub fn snr(&self) -> i16 {
        self.snr_byte as i16 - SNR_OFFSET as i16
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + RELAY_OVERHEAD);
        buf.put_u8(RELAY_START);
        buf.put_u8(self.payload.len() as u8);
        buf.put_u8(self.rssi_byte);
        buf.put_u8(self.snr_byte);
        buf.put_slice(&self.payload);
        buf.put_u8(RELAY_END);
        buf.freeze()
    }
}

/// Wall-clock time pushed from the host to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeSync {
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    /// `None` if the fields do not form a calendar date and time.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?.and_hms_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
    }

    pub fn encode(&self) -> [u8; TIME_SYNC_SIZE] {
        let [year_hi, year_lo] = self.year.to_be_bytes();
        [
            TIME_SYNC_LEAD,
            TIME_SYNC_SECOND,
            year_hi,
            year_lo,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            TIME_SYNC_END,
        ]
    }

    pub fn decode(data: &[u8]) -> Result<Self, WsError> {
        let raw: [u8; TIME_SYNC_SIZE] = data
            .get(..TIME_SYNC_SIZE)
            .ok_or(WsError::InsufficientData {
                expected: TIME_SYNC_SIZE,
                actual: data.len(),
            })?
            .try_into()?;
        if raw[0] != TIME_SYNC_LEAD || raw[1] != TIME_SYNC_SECOND || raw[9] != TIME_SYNC_END {
            return Err(WsError::InvalidPacket(format!(
                "bad time sync markers {:02x} {:02x} .. {:02x}",
                raw[0], raw[1], raw[9]
            )));
        }
        Ok(Self {
            year: u16::from_be_bytes([raw[2], raw[3]]),
            month: raw[4],
            day: raw[5],
            hour: raw[6],
            minute: raw[7],
            second: raw[8],
        })
    }
}

impl fmt::Display for TimeSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Frame(RelayFrame),
    TimeSync(TimeSync),
}

/// Incremental decoder for the serial stream. Framing violations are
/// recovered by dropping one byte and rescanning.
#[derive(Debug, Default)]
pub struct SerialDecoder {
    buf: BytesMut,
    min_frame_len: usize,
    skipped_bytes: u64,
    frame_errors: u64,
}

impl SerialDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames whose declared length is below `len`.
    pub fn with_min_frame_len(mut self, len: usize) -> Self {
        self.min_frame_len = len;
        self
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn frame_errors(&self) -> u64 {
        self.frame_errors
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn discard(&mut self) {
        self.buf.advance(1);
        self.skipped_bytes += 1;
    }

    fn reject(&mut self, reason: &str) {
        warn!("Serial framing error: {}, resyncing", reason);
        self.frame_errors += 1;
        self.discard();
    }

    /// Whether a complete, well-terminated event starts at `at`.
    fn complete_event_at(&self, at: usize) -> bool {
        let rest = &self.buf[at..];
        match rest.first() {
            Some(&TIME_SYNC_LEAD) => {
                rest.len() >= TIME_SYNC_SIZE && TimeSync::decode(&rest[..TIME_SYNC_SIZE]).is_ok()
            }
            Some(&RELAY_START) if rest.len() >= RELAY_OVERHEAD => {
                let len = rest[1] as usize;
                let total = len + RELAY_OVERHEAD;
                len >= self.min_frame_len && rest.len() >= total && rest[total - 1] == RELAY_END
            }
            _ => false,
        }
    }

    /// A pending header whose declared length has not arrived yet is false
    /// when a complete event is already buffered behind its start marker.
    fn complete_event_after_lead(&self) -> bool {
        (1..self.buf.len()).any(|at| self.complete_event_at(at))
    }

    /// Give up on a partially received frame or time sync: drop its first
    /// byte so the next call rescans from there. Called on read timeouts and
    /// at end of stream. Returns `false` when nothing is buffered.
    pub fn expire_partial(&mut self) -> bool {
        match self.buf.first() {
            None => false,
            Some(&RELAY_START) => {
                self.reject("partial frame expired");
                true
            }
            Some(_) => {
                self.discard();
                true
            }
        }
    }

    /// Next complete event, or `None` when more bytes are needed.
    pub fn next_event(&mut self) -> Option<SerialEvent> {
        loop {
            let lead = *self.buf.first()?;
            match lead {
                TIME_SYNC_LEAD => {
                    if self.buf.len() < TIME_SYNC_SIZE {
                        return None;
                    }
                    match TimeSync::decode(&self.buf[..TIME_SYNC_SIZE]) {
                        Ok(sync) => {
                            self.buf.advance(TIME_SYNC_SIZE);
                            debug!("Time sync {}", sync);
                            return Some(SerialEvent::TimeSync(sync));
                        }
                        Err(_) => self.discard(),
                    }
                }
                RELAY_START => {
                    if self.buf.len() < RELAY_OVERHEAD - 1 {
                        return None;
                    }
                    let len = self.buf[1] as usize;
                    if len < self.min_frame_len {
                        self.reject(&format!("frame length {} below {}", len, self.min_frame_len));
                        continue;
                    }
                    let total = len + RELAY_OVERHEAD;
                    if self.buf.len() < total {
                        if self.complete_event_after_lead() {
                            self.reject(&format!("frame length {} overruns a complete frame", len));
                            continue;
                        }
                        return None;
                    }
                    if self.buf[total - 1] != RELAY_END {
                        self.reject(&format!("missing end marker, found {:02x}", self.buf[total - 1]));
                        continue;
                    }
                    let frame = self.buf.split_to(total).freeze();
                    return Some(SerialEvent::Frame(RelayFrame::from_raw(
                        frame[2],
                        frame[3],
                        frame.slice(4..4 + len),
                    )));
                }
                _ => self.discard(),
            }
        }
    }
}

impl Iterator for SerialDecoder {
    type Item = SerialEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event()
    }
}

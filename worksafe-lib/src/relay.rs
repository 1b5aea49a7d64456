//! Relay node: receives radio packets, filters them, and forwards them to
//! the gateway host over the serial hop.

use crate::clock::Clock;
use crate::config::RadioConfig;
use crate::error::WsError;
use crate::packet::Packet;
use crate::radio::{RxFrame, Transceiver};
use crate::serial::{RelayFrame, SerialDecoder, SerialEvent, TimeSync};
use bytes::Bytes;
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, info, warn};

/// A valid packet together with the bytes and signal it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    pub packet: Packet,
    pub raw: Bytes,
    pub rssi: i16,
    pub snr: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RxOutcome {
    /// Valid packet with a new frame counter
    New(ReceivedPacket),
    /// Valid packet carrying the previous frame counter again
    Repeat(ReceivedPacket),
    /// Malformed packet; `duplicate` when byte-identical to the last malformed one
    Invalid { reason: String, duplicate: bool },
}

impl RxOutcome {
    pub fn packet(&self) -> Option<&ReceivedPacket> {
        match self {
            RxOutcome::New(p) | RxOutcome::Repeat(p) => Some(p),
            RxOutcome::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Valid packets with distinct frame counters
    pub received: u32,
    /// Distinct malformed packets
    pub skipped: u32,
    /// Valid packets that repeated a frame counter
    pub repeats: u32,
    pub forwarded: u32,
}

/// Validation and duplicate suppression for received radio frames.
///
/// Deduplication only compares frame counters; after the counter wraps a
/// new packet that happens to reuse the previous value is counted as a repeat.
#[derive(Debug, Default)]
pub struct RelayReceiver {
    last_invalid: Option<Bytes>,
    last_counter: Option<u16>,
    last_valid: Option<ReceivedPacket>,
    stats: RelayStats,
}

impl RelayReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Last good packet. Malformed traffic never replaces it.
    pub fn last_valid(&self) -> Option<&ReceivedPacket> {
        self.last_valid.as_ref()
    }

    pub fn accept(&mut self, frame: RxFrame) -> RxOutcome {
        let packet = match Packet::try_from(frame.data.clone()) {
            Ok(packet) => packet,
            Err(e) => {
                let duplicate = self.last_invalid.as_ref() == Some(&frame.data);
                if duplicate {
                    debug!("Repeated malformed packet ignored");
                } else {
                    self.stats.skipped += 1;
                    warn!("Skipped malformed packet #{}: {}", self.stats.skipped, e);
                    self.last_invalid = Some(frame.data);
                }
                return RxOutcome::Invalid {
                    reason: e.to_string(),
                    duplicate,
                };
            }
        };

        let is_new = self.last_counter != Some(packet.frame_counter);
        let received = ReceivedPacket {
            packet,
            raw: frame.data,
            rssi: frame.rssi,
            snr: frame.snr,
        };
        self.last_valid = Some(received.clone());

        if is_new {
            self.last_counter = Some(received.packet.frame_counter);
            self.stats.received += 1;
            info!(
                "Packet #{} from {}: {} frame {}, RSSI {} dBm, SNR {:.1} dB",
                self.stats.received,
                received.packet.device_id,
                received.packet.packet_type,
                received.packet.frame_counter,
                received.rssi,
                received.snr
            );
            RxOutcome::New(received)
        } else {
            self.stats.repeats += 1;
            debug!("Frame {} heard again", received.packet.frame_counter);
            RxOutcome::Repeat(received)
        }
    }
}

/// Wall clock kept from the host's time sync messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncedClock {
    anchor: Option<(NaiveDateTime, u64)>,
}

impl SyncedClock {
    /// Returns false, leaving the clock unchanged, for an impossible date.
    pub fn sync(&mut self, sync: &TimeSync, now_ms: u64) -> bool {
        match sync.to_datetime() {
            Some(dt) => {
                self.anchor = Some((dt, now_ms));
                info!("Time synced: {}", sync);
                true
            }
            None => {
                warn!("Ignoring invalid time sync {}", sync);
                false
            }
        }
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn last_sync_ms(&self) -> Option<u64> {
        self.anchor.map(|(_, at)| at)
    }

    pub fn now(&self, now_ms: u64) -> Option<NaiveDateTime> {
        let (base, at) = self.anchor?;
        let elapsed = TimeDelta::try_milliseconds(now_ms.saturating_sub(at) as i64)?;
        base.checked_add_signed(elapsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayOptions {
    /// Forward packets whose frame counter repeats (they are never counted)
    pub forward_repeats: bool,
    pub rx_timeout_ms: u64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            forward_repeats: true,
            rx_timeout_ms: 100,
        }
    }
}

/// The relay node's main loop state.
#[derive(Debug)]
pub struct Relay<T: Transceiver, W: Write, C: Clock> {
    radio: T,
    serial: W,
    clock: C,
    options: RelayOptions,
    receiver: RelayReceiver,
    host_input: SerialDecoder,
    wall_clock: SyncedClock,
}

impl<T: Transceiver, W: Write, C: Clock> Relay<T, W, C> {
    pub fn init(
        mut radio: T,
        radio_config: &RadioConfig,
        serial: W,
        clock: C,
        options: RelayOptions,
    ) -> Result<Self, WsError> {
        radio.configure(radio_config).map_err(|e| match e {
            e @ WsError::RadioInit(_) => e,
            other => WsError::RadioInit(other.to_string()),
        })?;
        info!("Relay listening on {} MHz", radio_config.frequency_mhz);
        Ok(Self {
            radio,
            serial,
            clock,
            options,
            receiver: RelayReceiver::new(),
            host_input: SerialDecoder::new(),
            wall_clock: SyncedClock::default(),
        })
    }

    pub fn stats(&self) -> RelayStats {
        self.receiver.stats
    }

    pub fn receiver(&self) -> &RelayReceiver {
        &self.receiver
    }

    pub fn serial(&self) -> &W {
        &self.serial
    }

    /// The serial sink, for handing forwarded bytes on to the host.
    pub fn serial_mut(&mut self) -> &mut W {
        &mut self.serial
    }

    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    /// Current wall time, once the host has synced us.
    pub fn wall_time(&self) -> Option<NaiveDateTime> {
        self.wall_clock.now(self.clock.now_ms())
    }

    /// One receive cycle. `Ok(None)` when nothing arrived before the timeout.
    pub fn poll(&mut self) -> Result<Option<RxOutcome>, WsError> {
        let frame = match self.radio.receive(self.options.rx_timeout_ms) {
            Ok(frame) => frame,
            Err(WsError::ReceiveTimeout) => return Ok(None),
            Err(e) => return Err(e),
        };

        let outcome = self.receiver.accept(frame);
        let forward = match &outcome {
            RxOutcome::New(p) => Some(p),
            RxOutcome::Repeat(p) if self.options.forward_repeats => Some(p),
            _ => None,
        };
        if let Some(p) = forward {
            let relay_frame = RelayFrame::new(p.raw.clone(), p.rssi, p.snr)?;
            let wire = relay_frame.encode();
            self.serial.write_all(&wire)?;
            self.serial.flush()?;
            self.receiver.stats.forwarded += 1;
            debug!("Forwarded {} bytes to host", wire.len());
        }
        Ok(Some(outcome))
    }

    /// Feed bytes read from the host side of the serial line.
    pub fn handle_host_input(&mut self, data: &[u8]) {
        self.host_input.push(data);
        while let Some(event) = self.host_input.next_event() {
            match event {
                SerialEvent::TimeSync(sync) => {
                    self.wall_clock.sync(&sync, self.clock.now_ms());
                }
                SerialEvent::Frame(frame) => {
                    warn!(
                        "Unexpected frame of {} bytes from host",
                        frame.payload().len()
                    );
                }
            }
        }
    }
}

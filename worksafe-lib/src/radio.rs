//! Long-range radio link: the transceiver seam, the wearable's transmit
//! side, and an in-memory transceiver for simulation.

use crate::config::RadioConfig;
use crate::constants::MAX_RADIO_FRAME_SIZE;
use crate::error::WsError;
use crate::packet::{DeviceId, Packet};
use crate::payload::Payload;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// A frame pulled off the air with its signal quality.
#[derive(Debug, Clone, PartialEq)]
pub struct RxFrame {
    pub data: Bytes,
    /// dBm
    pub rssi: i16,
    /// dB
    pub snr: f32,
}

/// Half-duplex packet radio.
pub trait Transceiver {
    /// Apply modem settings. Failure here is fatal for the device.
    fn configure(&mut self, config: &RadioConfig) -> Result<(), WsError>;

    /// Blocking transmit of one frame.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), WsError>;

    /// Wait up to `timeout_ms` for a frame; `Err(WsError::ReceiveTimeout)` if none arrives.
    fn receive(&mut self, timeout_ms: u64) -> Result<RxFrame, WsError>;
}

/// Transmit side of a wearable: frames payloads and owns the frame counter.
#[derive(Debug)]
pub struct RadioTx<T: Transceiver> {
    radio: T,
    device_id: DeviceId,
    frame_counter: u16,
}

impl<T: Transceiver> RadioTx<T> {
    /// Configure the transceiver. An error means the device has no telemetry path.
    pub fn init(mut radio: T, config: &RadioConfig, device_id: DeviceId) -> Result<Self, WsError> {
        config.validate()?;
        radio.configure(config).map_err(|e| match e {
            e @ WsError::RadioInit(_) => e,
            other => WsError::RadioInit(other.to_string()),
        })?;
        info!(
            "Radio ready: {} MHz SF{} BW {} kHz, device {}",
            config.frequency_mhz, config.spreading_factor, config.bandwidth_khz, device_id
        );
        Ok(Self {
            radio,
            device_id,
            frame_counter: 0,
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Counter the next frame will carry.
    pub fn frame_counter(&self) -> u16 {
        self.frame_counter
    }

    pub fn radio(&self) -> &T {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    /// Frame and send a payload. The counter only advances on success.
    pub fn send(&mut self, payload: &Payload) -> bool {
        let frame = match Packet::new(self.device_id, self.frame_counter, payload)
            .and_then(|packet| packet.to_bytes())
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to build {} packet: {}", payload.packet_type(), e);
                return false;
            }
        };

        match self.radio.transmit(&frame) {
            Ok(()) => {
                info!(
                    "Sent {} packet #{} ({} bytes)",
                    payload.packet_type(),
                    self.frame_counter,
                    frame.len()
                );
                self.frame_counter = self.frame_counter.wrapping_add(1);
                true
            }
            Err(e) => {
                warn!("Transmit of {} packet failed: {}", payload.packet_type(), e);
                false
            }
        }
    }
}

/// In-memory transceiver. Clones share one channel, so a wearable and a
/// relay built from the same `MemoryRadio` hear each other.
#[derive(Debug, Clone)]
pub struct MemoryRadio {
    air: Rc<RefCell<VecDeque<RxFrame>>>,
    rssi: i16,
    snr: f32,
    failures: Rc<RefCell<usize>>,
    configured: bool,
}

impl Default for MemoryRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self {
            air: Rc::new(RefCell::new(VecDeque::new())),
            rssi: -60,
            snr: 9.5,
            failures: Rc::new(RefCell::new(0)),
            configured: false,
        }
    }

    /// Signal quality reported for frames sent from this endpoint.
    pub fn with_signal(mut self, rssi: i16, snr: f32) -> Self {
        self.rssi = rssi;
        self.snr = snr;
        self
    }

    /// Make the next `count` transmits fail.
    pub fn fail_transmits(&self, count: usize) {
        *self.failures.borrow_mut() = count;
    }

    /// Put raw bytes on the air, bypassing framing.
    pub fn inject(&self, data: impl Into<Bytes>) {
        self.air.borrow_mut().push_back(RxFrame {
            data: data.into(),
            rssi: self.rssi,
            snr: self.snr,
        });
    }

    pub fn pending(&self) -> usize {
        self.air.borrow().len()
    }
}

impl Transceiver for MemoryRadio {
    fn configure(&mut self, config: &RadioConfig) -> Result<(), WsError> {
        config.validate()?;
        self.configured = true;
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), WsError> {
        if !self.configured {
            return Err(WsError::Transmit("radio not configured".to_string()));
        }
        if frame.len() > MAX_RADIO_FRAME_SIZE {
            return Err(WsError::FrameTooLarge {
                size: frame.len(),
                max: MAX_RADIO_FRAME_SIZE,
            });
        }
        {
            let mut failures = self.failures.borrow_mut();
            if *failures > 0 {
                *failures -= 1;
                return Err(WsError::Transmit("channel busy".to_string()));
            }
        }
        self.inject(Bytes::copy_from_slice(frame));
        Ok(())
    }

    fn receive(&mut self, _timeout_ms: u64) -> Result<RxFrame, WsError> {
        let frame = self.air.borrow_mut().pop_front();
        match frame {
            Some(frame) => {
                debug!("Radio rx {} bytes, RSSI {} dBm", frame.data.len(), frame.rssi);
                Ok(frame)
            }
            None => Err(WsError::ReceiveTimeout),
        }
    }
}

//! Common test utilities and shared imports

// Shared across test files; not every item is used in each one
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use worksafe_lib::config::{DetectorConfig, RadioConfig, TelemetrySchedule, VitalThresholds};
#[allow(unused_imports)]
pub use worksafe_lib::constants::GRAVITY;
#[allow(unused_imports)]
pub use worksafe_lib::error::WsError;
#[allow(unused_imports)]
pub use worksafe_lib::fall::{FallDetector, FallEvent, FallState};
#[allow(unused_imports)]
pub use worksafe_lib::fusion::{PostureBaseline, SensorSample};
#[allow(unused_imports)]
pub use worksafe_lib::packet::{DeviceId, Packet, PacketType};
#[allow(unused_imports)]
pub use worksafe_lib::payload::{AlertFlags, Payload, RealtimePayload};

/// 50 Hz motion sampling
#[allow(dead_code)]
pub const TICK_MS: u64 = 20;

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Upright and motionless
#[allow(dead_code)]
pub fn still(t: u64) -> SensorSample {
    SensorSample::new(t, [0.0, 0.0, GRAVITY], [0.0; 3])
}

/// Detector calibrated upright, fed one second of stillness.
/// Returns the detector and the next timestamp.
#[allow(dead_code)]
pub fn settled_detector(config: DetectorConfig) -> (FallDetector, u64) {
    let mut detector = FallDetector::new(config);
    detector.calibrate(PostureBaseline::default());
    let mut t = 0;
    for _ in 0..50 {
        detector.process(&still(t));
        t += TICK_MS;
    }
    (detector, t)
}

#[allow(dead_code)]
pub fn realtime_payload() -> Payload {
    Payload::Realtime(RealtimePayload {
        heart_rate: 82,
        body_temp_c: 36.9,
        ambient_temp_c: 28.0,
        noise_db: 71,
        fall_state: FallState::Normal,
        alerts: AlertFlags::new(),
        rssi: 0,
        snr: 0,
    })
}

/// Deterministic xorshift generator for noise streams
#[allow(dead_code)]
pub struct Noise(u64);

#[allow(dead_code)]
impl Noise {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    /// Uniform in [-1, 1)
    pub fn next(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }
}

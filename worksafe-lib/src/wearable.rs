//! The wearable's telemetry loop: detection every tick, immediate reports on
//! critical state changes, one fall event per confirmed fall, and periodic
//! realtime and ECG packets.

use crate::config::{DetectorConfig, TelemetrySchedule, VitalThresholds};
use crate::ecg::EcgProcessor;
use crate::fall::{FallDetector, FallEvent, FallState};
use crate::fusion::{PostureCalibrator, SensorSample};
use crate::packet::PacketType;
use crate::payload::{AlertFlags, FallEventPayload, Payload, RealtimePayload};
use crate::radio::{RadioTx, Transceiver};
use crate::vitals::{Environment, HeartRateStatus};
use tracing::{info, warn};

const PQRST_INTERVAL_MS: u64 = 1000;

/// Why a realtime report is being sent. State-change reports use looser
/// alert criteria so the first report after a fall errs towards alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportReason {
    Scheduled,
    StateChange,
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepReport {
    pub event: FallEvent,
    pub sent: Vec<PacketType>,
    pub failed: Vec<PacketType>,
}

impl StepReport {
    fn record(&mut self, packet_type: PacketType, ok: bool) {
        if ok {
            self.sent.push(packet_type);
        } else {
            self.failed.push(packet_type);
        }
    }
}

pub struct Wearable<T: Transceiver> {
    detector: FallDetector,
    calibrator: Option<PostureCalibrator>,
    ecg: EcgProcessor,
    radio: RadioTx<T>,
    schedule: TelemetrySchedule,
    vitals: VitalThresholds,
    last_state: FallState,
    fall_event_sent: bool,
    max_noise_db: f32,
    last_realtime_ms: u64,
    last_ecg_ms: u64,
    last_pqrst_ms: u64,
}

impl<T: Transceiver> Wearable<T> {
    /// The first `calibration_samples` motion samples are taken as the
    /// resting posture.
    pub fn new(
        radio: RadioTx<T>,
        detector: DetectorConfig,
        schedule: TelemetrySchedule,
        vitals: VitalThresholds,
    ) -> Self {
        Self {
            calibrator: Some(PostureCalibrator::new(detector.calibration_samples)),
            detector: FallDetector::new(detector),
            ecg: EcgProcessor::new(&vitals),
            radio,
            schedule,
            vitals,
            last_state: FallState::Normal,
            fall_event_sent: false,
            max_noise_db: 0.0,
            last_realtime_ms: 0,
            last_ecg_ms: 0,
            last_pqrst_ms: 0,
        }
    }

    pub fn detector(&self) -> &FallDetector {
        &self.detector
    }

    pub fn ecg(&self) -> &EcgProcessor {
        &self.ecg
    }

    pub fn radio(&self) -> &RadioTx<T> {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut RadioTx<T> {
        &mut self.radio
    }

    /// Feed one ECG reading (100 Hz). `None` when the leads are off.
    pub fn push_ecg(&mut self, reading: Option<u16>, now_ms: u64) {
        self.ecg.push(reading, now_ms);
        if self.ecg.bpm() > 0
            && reading.is_some()
            && now_ms.saturating_sub(self.last_pqrst_ms) > PQRST_INTERVAL_MS
        {
            self.ecg.extract_pqrst();
            self.last_pqrst_ms = now_ms;
        }
    }

    /// One loop iteration at the sample's timestamp.
    pub fn step(&mut self, sample: &SensorSample, env: Environment) -> StepReport {
        let now = sample.timestamp_ms;

        if let Some(calibrator) = self.calibrator.as_mut() {
            if let Some(baseline) = calibrator.push(sample) {
                self.detector.calibrate(baseline);
                self.calibrator = None;
            }
        }

        let event = *self.detector.process(sample);
        let mut report = StepReport {
            event,
            ..StepReport::default()
        };

        if env.noise_db > self.max_noise_db {
            self.max_noise_db = env.noise_db;
        }

        if event.state != self.last_state {
            let critical = matches!(event.state, FallState::FallDetected | FallState::Dangerous)
                || (self.last_state.is_fall() && event.state == FallState::Normal);
            self.last_state = event.state;
            if critical {
                info!("Critical state change to {}, reporting now", event.state);
                let ok = self.send_realtime(&event, &env, ReportReason::StateChange);
                report.record(PacketType::Realtime, ok);
            }
        }

        if event.confirmed && !self.fall_event_sent {
            let payload = Payload::FallEvent(FallEventPayload::from_event(
                &event,
                self.heart_rate_byte(),
                env.body_temp_c.unwrap_or(0.0),
            ));
            let ok = self.radio.send(&payload);
            if ok {
                self.fall_event_sent = true;
            } else {
                warn!("Fall event not delivered, state reports will carry the fall");
            }
            report.record(PacketType::FallEvent, ok);
        }
        if matches!(event.state, FallState::Normal | FallState::Recovery) {
            self.fall_event_sent = false;
        }

        // Failed periodic sends wait for the next interval
        if now.saturating_sub(self.last_realtime_ms) >= self.schedule.realtime_interval_ms {
            self.last_realtime_ms = now;
            let ok = self.send_realtime(&event, &env, ReportReason::Scheduled);
            if ok {
                self.max_noise_db = 0.0;
            }
            report.record(PacketType::Realtime, ok);
        }

        if now.saturating_sub(self.last_ecg_ms) >= self.schedule.ecg_interval_ms {
            let bpm = self.ecg.bpm();
            if bpm > self.schedule.ecg_min_bpm && bpm < self.schedule.ecg_max_bpm {
                self.last_ecg_ms = now;
                let ok = self.radio.send(&Payload::Ecg(self.ecg.payload()));
                report.record(PacketType::Ecg, ok);
            }
        }

        report
    }

    fn heart_rate_byte(&self) -> u8 {
        self.ecg.bpm().min(u8::MAX as u16) as u8
    }

    pub fn alert_flags(&self, state: FallState, env: &Environment, reason: ReportReason) -> AlertFlags {
        let hr = self
            .vitals
            .heart_rate_status(self.ecg.bpm(), self.ecg.leads_off());
        let temp = self.vitals.temperature_status(env.body_temp_c);
        match reason {
            ReportReason::Scheduled => AlertFlags::new()
                .with_heart_rate(hr.is_abnormal())
                .with_temperature(temp.is_fever())
                .with_fall(state.is_fall())
                .with_noise(self.max_noise_db > self.schedule.noise_alert_db),
            ReportReason::StateChange => AlertFlags::new()
                .with_heart_rate(hr != HeartRateStatus::Normal)
                .with_temperature(u8::from(temp) >= 3)
                .with_fall(state >= FallState::FallDetected)
                .with_noise(self.max_noise_db >= self.schedule.state_change_noise_alert_db),
        }
    }

    fn send_realtime(&mut self, event: &FallEvent, env: &Environment, reason: ReportReason) -> bool {
        let noise = if self.max_noise_db > 0.0 {
            self.max_noise_db
        } else {
            env.noise_db
        };
        let payload = RealtimePayload {
            heart_rate: self.heart_rate_byte(),
            body_temp_c: env.body_temp_c.unwrap_or(0.0),
            ambient_temp_c: env.ambient_temp_c.unwrap_or(0.0),
            noise_db: noise as u8,
            fall_state: event.state,
            alerts: self.alert_flags(event.state, env, reason),
            rssi: 0,
            snr: 0,
        };
        self.radio.send(&Payload::Realtime(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadioConfig;
    use crate::constants::GRAVITY;
    use crate::packet::{DeviceId, Packet};
    use crate::radio::MemoryRadio;

    fn wearable(air: &MemoryRadio) -> Wearable<MemoryRadio> {
        let tx = RadioTx::init(air.clone(), &RadioConfig::default(), DeviceId::from_name("W7")).unwrap();
        Wearable::new(
            tx,
            DetectorConfig::default(),
            TelemetrySchedule::default(),
            VitalThresholds::default(),
        )
    }

    fn env() -> Environment {
        Environment {
            body_temp_c: Some(36.6),
            ambient_temp_c: Some(24.0),
            noise_db: 60.0,
        }
    }

    fn still(t: u64) -> SensorSample {
        SensorSample::new(t, [0.0, 0.0, GRAVITY], [0.0; 3])
    }

    #[test]
    fn test_periodic_realtime_and_failure_waits_for_next_interval() {
        let air = MemoryRadio::new();
        let mut w = wearable(&air);

        assert!(w.step(&still(100), env()).sent.is_empty());
        let report = w.step(&still(60_000), env());
        assert_eq!(report.sent, vec![PacketType::Realtime]);

        air.fail_transmits(1);
        let report = w.step(&still(120_000), env());
        assert_eq!(report.failed, vec![PacketType::Realtime]);
        // no retry on the following tick
        assert!(w.step(&still(120_020), env()).failed.is_empty());
        assert_eq!(w.step(&still(180_000), env()).sent, vec![PacketType::Realtime]);
    }

    #[test]
    fn test_ecg_requires_plausible_heart_rate() {
        let air = MemoryRadio::new();
        let mut w = wearable(&air);
        let report = w.step(&still(306_000), env());
        assert!(!report.sent.contains(&PacketType::Ecg));

        let mut t = 306_000;
        for i in 0..400u64 {
            let value = if i % 80 == 40 { 3000 } else { 2048 };
            w.push_ecg(Some(value), t);
            t += 10;
        }
        assert_eq!(w.ecg().bpm(), 75);
        let report = w.step(&still(t), env());
        assert!(report.sent.contains(&PacketType::Ecg));
    }

    #[test]
    fn test_fall_sends_state_change_and_single_fall_event() {
        let air = MemoryRadio::new();
        let mut rx = air.clone();
        let mut w = wearable(&air);

        let mut t = 0;
        for _ in 0..20 {
            w.step(&still(t), env());
            t += 20;
        }
        assert!(w.detector().is_calibrated());

        let mut sent = Vec::new();
        for _ in 0..10 {
            sent.extend(w.step(&SensorSample::new(t, [0.0, 0.0, 2.0], [0.0; 3]), env()).sent);
            t += 20;
        }
        for i in 0..15 {
            let accel = if i == 0 { [0.0, 0.0, 25.0] } else { [0.0, 0.0, GRAVITY] };
            sent.extend(w.step(&SensorSample::new(t, accel, [150.0, 0.0, 0.0]), env()).sent);
            t += 20;
        }
        assert_eq!(sent, vec![PacketType::Realtime, PacketType::FallEvent]);

        let first = Packet::try_from(rx.receive(0).unwrap().data).unwrap();
        match first.decode_payload().unwrap() {
            Payload::Realtime(p) => {
                assert_eq!(p.fall_state, FallState::FallDetected);
                assert!(p.alerts.fall());
                // no ECG signal yet counts as abnormal on state-change reports
                assert!(p.alerts.heart_rate());
            }
            other => panic!("expected realtime, got {other:?}"),
        }
        let second = Packet::try_from(rx.receive(0).unwrap().data).unwrap();
        assert_eq!(second.frame_counter, first.frame_counter + 1);
        assert!(matches!(second.decode_payload().unwrap(), Payload::FallEvent(_)));
    }
}

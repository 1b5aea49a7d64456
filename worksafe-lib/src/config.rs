//! Tunable parameters for the detector, the telemetry schedule, vital sign
//! classification and the radio.
//!
//! Every struct deserializes from JSON with missing fields taking the tuned
//! device defaults, so a config file only needs the values it overrides.

use crate::error::WsError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum_macros::Display;

/// Acceleration and jerk thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactThresholds {
    /// m/s³
    pub jerk_high: f32,
    pub jerk_medium: f32,
    pub jerk_low: f32,
    /// g
    pub svm_high: f32,
    /// Below this the wearer is in free fall (g)
    pub svm_freefall: f32,
    pub svm_warning: f32,
    pub svm_impact_peak: f32,
}

impl Default for ImpactThresholds {
    fn default() -> Self {
        Self {
            jerk_high: 450_000.0,
            jerk_medium: 300_000.0,
            jerk_low: 200_000.0,
            svm_high: 1.8,
            svm_freefall: 0.65,
            svm_warning: 1.4,
            svm_impact_peak: 2.2,
        }
    }
}

/// Angular velocity thresholds (°/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationThresholds {
    pub combined: f32,
    pub sustained: f32,
}

impl Default for RotationThresholds {
    fn default() -> Self {
        Self {
            combined: 180.0,
            sustained: 120.0,
        }
    }
}

/// Posture change thresholds, relative to the calibrated baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureThresholds {
    /// degrees
    pub pitch: f32,
    pub roll: f32,
    pub rapid_change: f32,
    /// degrees per second
    pub pitch_rate: f32,
    pub roll_rate: f32,
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            pitch: 40.0,
            roll: 35.0,
            rapid_change: 60.0,
            pitch_rate: 100.0,
            roll_rate: 80.0,
        }
    }
}

/// Detector timers, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorTiming {
    pub confirmation_grace_ms: u64,
    pub recovery_cooldown_ms: u64,
    pub immobility_interval_ms: u64,
    pub fall_sequence_window_ms: u64,
    pub bowing_rejection_ms: u64,
}

impl Default for DetectorTiming {
    fn default() -> Self {
        Self {
            confirmation_grace_ms: 500,
            recovery_cooldown_ms: 5000,
            immobility_interval_ms: 100,
            fall_sequence_window_ms: 800,
            bowing_rejection_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountThresholds {
    pub impact: u8,
    pub warning: u8,
    pub gyro_sustained: u8,
}

impl Default for CountThresholds {
    fn default() -> Self {
        Self {
            impact: 2,
            warning: 3,
            gyro_sustained: 3,
        }
    }
}

/// Post-fall immobility criteria. A full window is immobile when at least
/// `criteria_needed` of the four statistics fall below their limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmobilityThresholds {
    pub accel_variance: f32,
    pub accel_stddev: f32,
    pub gyro_variance: f32,
    pub svm_range: f32,
    pub window_len: usize,
    pub criteria_needed: u8,
}

impl Default for ImmobilityThresholds {
    fn default() -> Self {
        Self {
            accel_variance: 0.005,
            accel_stddev: 0.1,
            gyro_variance: 5.0,
            svm_range: 0.1,
            window_len: 10,
            criteria_needed: 3,
        }
    }
}

/// Weights and cutoffs of the confirmation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub impact_sequence: u8,
    pub impact: u8,
    pub sustained_rotation: u8,
    pub high_rotation: u8,
    pub rapid_posture: u8,
    pub posture: u8,
    pub jerk: u8,
    pub full_sequence: u8,
    /// Score that confirms on its own
    pub strong_cutoff: u8,
    /// Score that confirms when `moderate_criteria` criteria fired
    pub moderate_cutoff: u8,
    pub moderate_criteria: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            impact_sequence: 3,
            impact: 1,
            sustained_rotation: 3,
            high_rotation: 2,
            rapid_posture: 3,
            posture: 2,
            jerk: 1,
            full_sequence: 2,
            strong_cutoff: 6,
            moderate_cutoff: 4,
            moderate_criteria: 3,
        }
    }
}

/// Sensitivity presets shipped on the device. None of them is the default:
/// [`DetectorConfig::default`] holds the un-profiled tuned constants and a
/// profile only applies when selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityProfile {
    /// Fewer false alarms, may miss soft falls
    Conservative,
    Balanced,
    /// Catches more falls, more false alarms
    Sensitive,
}

/// Complete fall detector configuration. `Default` gives the device's
/// un-profiled constants, which match none of the profiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub impact: ImpactThresholds,
    pub rotation: RotationThresholds,
    pub posture: PostureThresholds,
    pub timing: DetectorTiming,
    pub counts: CountThresholds,
    pub immobility: ImmobilityThresholds,
    pub scoring: ScoreWeights,
    /// Stationary samples averaged into the posture baseline
    pub calibration_samples: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            impact: ImpactThresholds::default(),
            rotation: RotationThresholds::default(),
            posture: PostureThresholds::default(),
            timing: DetectorTiming::default(),
            counts: CountThresholds::default(),
            immobility: ImmobilityThresholds::default(),
            scoring: ScoreWeights::default(),
            calibration_samples: 20,
        }
    }
}

impl DetectorConfig {
    /// Defaults with a sensitivity profile's overrides applied.
    pub fn with_profile(profile: SensitivityProfile) -> Self {
        let mut config = Self::default();
        config.apply_profile(profile);
        config
    }

    pub fn apply_profile(&mut self, profile: SensitivityProfile) {
        let (jerk_high, jerk_medium, svm_high, svm_freefall) = match profile {
            SensitivityProfile::Conservative => (450_000.0, 250_000.0, 2.0, 0.6),
            SensitivityProfile::Balanced => (350_000.0, 200_000.0, 1.8, 0.65),
            SensitivityProfile::Sensitive => (280_000.0, 150_000.0, 1.6, 0.7),
        };
        let (combined, sustained, pitch, roll) = match profile {
            SensitivityProfile::Conservative => (200.0, 140.0, 45.0, 38.0),
            SensitivityProfile::Balanced => (180.0, 120.0, 40.0, 35.0),
            SensitivityProfile::Sensitive => (160.0, 100.0, 35.0, 30.0),
        };
        let (impact, gyro_sustained) = match profile {
            SensitivityProfile::Conservative => (3, 4),
            SensitivityProfile::Balanced => (2, 3),
            SensitivityProfile::Sensitive => (1, 2),
        };

        self.impact.jerk_high = jerk_high;
        self.impact.jerk_medium = jerk_medium;
        self.impact.svm_high = svm_high;
        self.impact.svm_freefall = svm_freefall;
        self.rotation.combined = combined;
        self.rotation.sustained = sustained;
        self.posture.pitch = pitch;
        self.posture.roll = roll;
        self.counts.impact = impact;
        self.counts.gyro_sustained = gyro_sustained;
    }

    pub fn validate(&self) -> Result<(), WsError> {
        if self.immobility.window_len == 0 {
            return Err(WsError::InvalidConfig(
                "immobility window must hold at least one sample".to_string(),
            ));
        }
        if !(1..=4).contains(&self.immobility.criteria_needed) {
            return Err(WsError::InvalidConfig(format!(
                "immobility criteria_needed must be 1-4, got {}",
                self.immobility.criteria_needed
            )));
        }
        if self.calibration_samples == 0 {
            return Err(WsError::InvalidConfig(
                "calibration needs at least one sample".to_string(),
            ));
        }
        if self.impact.svm_freefall >= self.impact.svm_warning {
            return Err(WsError::InvalidConfig(format!(
                "free-fall SVM {} must be below warning SVM {}",
                self.impact.svm_freefall, self.impact.svm_warning
            )));
        }
        Ok(())
    }
}

/// Transmission schedule of the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySchedule {
    pub realtime_interval_ms: u64,
    pub ecg_interval_ms: u64,
    /// ECG is only sent while min < bpm < max
    pub ecg_min_bpm: u16,
    pub ecg_max_bpm: u16,
    /// Noise alert on periodic reports (dB)
    pub noise_alert_db: f32,
    /// Noise alert on reports triggered by a state change (dB)
    pub state_change_noise_alert_db: f32,
}

impl Default for TelemetrySchedule {
    fn default() -> Self {
        Self {
            realtime_interval_ms: 60_000,
            ecg_interval_ms: 306_000,
            ecg_min_bpm: 40,
            ecg_max_bpm: 150,
            noise_alert_db: 100.0,
            state_change_noise_alert_db: 80.0,
        }
    }
}

/// Vital sign bands used for status classification and alert bits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalThresholds {
    pub hr_low: u16,
    pub hr_high: u16,
    pub hr_valid_min: u16,
    pub hr_valid_max: u16,
    pub temp_too_low: f32,
    pub temp_below_normal: f32,
    pub temp_slightly_high: f32,
    pub temp_fever: f32,
    pub temp_high_fever: f32,
    pub temp_too_high: f32,
    pub noise_warning_db: f32,
    pub noise_danger_db: f32,
}

impl Default for VitalThresholds {
    fn default() -> Self {
        Self {
            hr_low: 50,
            hr_high: 120,
            hr_valid_min: 40,
            hr_valid_max: 200,
            temp_too_low: 34.0,
            temp_below_normal: 35.5,
            temp_slightly_high: 37.5,
            temp_fever: 38.0,
            temp_high_fever: 40.0,
            temp_too_high: 42.0,
            noise_warning_db: 85.0,
            noise_danger_db: 100.0,
        }
    }
}

/// LoRa modem parameters shared by the wearable and the relay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub frequency_mhz: f32,
    pub bandwidth_khz: f32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub sync_word: u8,
    pub tx_power_dbm: i8,
    pub preamble_len: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 923.0,
            bandwidth_khz: 125.0,
            spreading_factor: 9,
            coding_rate: 7,
            sync_word: 0x12,
            tx_power_dbm: 22,
            preamble_len: 8,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), WsError> {
        if !(7..=12).contains(&self.spreading_factor) {
            return Err(WsError::RadioInit(format!(
                "spreading factor {} out of range 7-12",
                self.spreading_factor
            )));
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(WsError::RadioInit(format!(
                "coding rate 4/{} out of range 4/5-4/8",
                self.coding_rate
            )));
        }
        if self.tx_power_dbm > 22 {
            return Err(WsError::RadioInit(format!(
                "tx power {} dBm exceeds 22 dBm",
                self.tx_power_dbm
            )));
        }
        if self.bandwidth_khz <= 0.0 || self.frequency_mhz <= 0.0 {
            return Err(WsError::RadioInit(
                "frequency and bandwidth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a JSON config string.
pub fn from_json_str<T: DeserializeOwned>(json: &str) -> Result<T, WsError> {
    Ok(serde_json::from_str(json)?)
}

/// Load a JSON config file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, WsError> {
    let text = std::fs::read_to_string(path)?;
    from_json_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        DetectorConfig::default().validate().unwrap();
        RadioConfig::default().validate().unwrap();
    }

    #[test]
    fn test_sensitive_profile_lowers_thresholds() {
        let sensitive = DetectorConfig::with_profile(SensitivityProfile::Sensitive);
        let conservative = DetectorConfig::with_profile(SensitivityProfile::Conservative);

        assert!(sensitive.impact.svm_high < conservative.impact.svm_high);
        assert!(sensitive.rotation.sustained < conservative.rotation.sustained);
        assert_eq!(sensitive.counts.impact, 1);
        assert_eq!(conservative.counts.gyro_sustained, 4);
        // untouched by profiles
        assert_eq!(sensitive.timing, DetectorTiming::default());
    }

    #[test]
    fn test_defaults_are_not_a_profile() {
        let defaults = DetectorConfig::default();
        assert_eq!(defaults.impact.jerk_high, 450_000.0);
        assert_eq!(defaults.impact.jerk_medium, 300_000.0);

        for profile in [
            SensitivityProfile::Conservative,
            SensitivityProfile::Balanced,
            SensitivityProfile::Sensitive,
        ] {
            assert_ne!(DetectorConfig::with_profile(profile), defaults, "{}", profile);
        }
        let balanced = DetectorConfig::with_profile(SensitivityProfile::Balanced);
        assert_eq!(balanced.impact.jerk_high, 350_000.0);
        assert_eq!(balanced.impact.svm_high, defaults.impact.svm_high);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: DetectorConfig =
            from_json_str(r#"{ "timing": { "bowing_rejection_ms": 2000 } }"#).unwrap();
        assert_eq!(config.timing.bowing_rejection_ms, 2000);
        assert_eq!(config.timing.fall_sequence_window_ms, 800);
        assert_eq!(config.scoring.strong_cutoff, 6);
    }

    #[test]
    fn test_invalid_radio_config() {
        let radio = RadioConfig {
            spreading_factor: 13,
            ..RadioConfig::default()
        };
        assert!(matches!(radio.validate(), Err(WsError::RadioInit(_))));
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let result: Result<TelemetrySchedule, _> = from_json_str("{ not json");
        assert!(matches!(result, Err(WsError::Config(_))));
    }
}

use crate::config::VitalThresholds;
use num_enum::IntoPrimitive;
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, Serialize)]
#[repr(u8)]
pub enum HeartRateStatus {
    Normal = 0,
    Bradycardia = 1,
    Tachycardia = 2,
    #[strum(to_string = "No signal")]
    NoSignal = 3,
}

impl HeartRateStatus {
    pub fn is_abnormal(&self) -> bool {
        matches!(self, HeartRateStatus::Bradycardia | HeartRateStatus::Tachycardia)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, Serialize)]
#[repr(u8)]
pub enum TemperatureStatus {
    Normal = 0,
    #[strum(to_string = "Below normal")]
    BelowNormal = 1,
    #[strum(to_string = "Slightly high")]
    SlightlyHigh = 2,
    Fever = 3,
    #[strum(to_string = "High fever")]
    HighFever = 4,
    /// Sensor fault or reading outside the physiological range
    Error = 5,
}

impl TemperatureStatus {
    pub fn is_fever(&self) -> bool {
        matches!(self, TemperatureStatus::Fever | TemperatureStatus::HighFever)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum NoiseLevel {
    Safe,
    Warning,
    Danger,
}

impl VitalThresholds {
    pub fn heart_rate_status(&self, bpm: u16, leads_off: bool) -> HeartRateStatus {
        if leads_off || bpm == 0 {
            HeartRateStatus::NoSignal
        } else if bpm < self.hr_low {
            HeartRateStatus::Bradycardia
        } else if bpm > self.hr_high {
            HeartRateStatus::Tachycardia
        } else {
            HeartRateStatus::Normal
        }
    }

    pub fn temperature_status(&self, temp_c: Option<f32>) -> TemperatureStatus {
        let Some(t) = temp_c.filter(|t| !t.is_nan()) else {
            return TemperatureStatus::Error;
        };
        if t < self.temp_too_low || t > self.temp_too_high {
            TemperatureStatus::Error
        } else if t < self.temp_below_normal {
            TemperatureStatus::BelowNormal
        } else if t >= self.temp_high_fever {
            TemperatureStatus::HighFever
        } else if t >= self.temp_fever {
            TemperatureStatus::Fever
        } else if t >= self.temp_slightly_high {
            TemperatureStatus::SlightlyHigh
        } else {
            TemperatureStatus::Normal
        }
    }

    pub fn noise_level(&self, db: f32) -> NoiseLevel {
        if db >= self.noise_danger_db {
            NoiseLevel::Danger
        } else if db >= self.noise_warning_db {
            NoiseLevel::Warning
        } else {
            NoiseLevel::Safe
        }
    }
}

/// 12-bit ADC, 3.3 V reference
const ADC_FULL_SCALE: f32 = 4095.0;
const ADC_REF_V: f32 = 3.3;
pub const DEFAULT_MIC_OFFSET_DB: f32 = 16.0;

/// Sound level from the peak-to-peak amplitude of a microphone sampling
/// window, relative to 1 mV plus a calibration offset, clamped to 0-120 dB.
pub fn sound_level_db(peak_to_peak: u16, offset_db: f32) -> f32 {
    let volts = peak_to_peak as f32 / ADC_FULL_SCALE * ADC_REF_V;
    if volts <= 0.0 {
        return 0.0;
    }
    (20.0 * (volts / 0.001).log10() + offset_db).clamp(0.0, 120.0)
}

/// Environment readings that accompany a detector tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Environment {
    /// °C, `None` when the sensor did not answer
    pub body_temp_c: Option<f32>,
    pub ambient_temp_c: Option<f32>,
    pub noise_db: f32,
}

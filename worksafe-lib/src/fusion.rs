//! Motion sample preprocessing: derivative metrics and posture angles.

use crate::constants::{GRAVITY, MIN_TICK_S};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// One IMU reading. Acceleration in m/s², rotation in °/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp_ms: u64,
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
}

impl SensorSample {
    pub fn new(timestamp_ms: u64, accel: [f32; 3], gyro: [f32; 3]) -> Self {
        Self {
            timestamp_ms,
            accel_x: accel[0],
            accel_y: accel[1],
            accel_z: accel[2],
            gyro_x: gyro[0],
            gyro_y: gyro[1],
            gyro_z: gyro[2],
        }
    }

    pub fn accel(&self) -> [f32; 3] {
        [self.accel_x, self.accel_y, self.accel_z]
    }

    pub fn gyro(&self) -> [f32; 3] {
        [self.gyro_x, self.gyro_y, self.gyro_z]
    }

    /// Pitch from the accelerometer, degrees.
    pub fn pitch(&self) -> f32 {
        self.accel_y.atan2(self.accel_z) * 180.0 / PI
    }

    /// Roll from the accelerometer, degrees.
    pub fn roll(&self) -> f32 {
        self.accel_x.atan2(self.accel_z) * 180.0 / PI
    }
}

fn magnitude(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Per-tick metrics derived from a sample and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DerivedMetrics {
    /// m/s³
    pub jerk: f32,
    /// g
    pub svm: f32,
    /// °/s
    pub angular_velocity: f32,
    /// Absolute angles, degrees
    pub pitch: f32,
    pub roll: f32,
    /// °/s
    pub pitch_rate: f32,
    pub roll_rate: f32,
}

/// Holds the previous sample so each tick can be differentiated.
#[derive(Debug, Clone, Default)]
pub struct SensorFusion {
    prev_accel: Option<[f32; 3]>,
    prev_angles: Option<(f32, f32)>,
}

impl SensorFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive metrics for `sample`, `dt_s` seconds after the previous one.
    /// The first sample has zero jerk and zero angular rates.
    pub fn update(&mut self, sample: &SensorSample, dt_s: f32) -> DerivedMetrics {
        let dt = if dt_s > 0.0 { dt_s } else { MIN_TICK_S };
        let accel = sample.accel();

        let jerk = match self.prev_accel {
            Some(prev) => {
                magnitude([accel[0] - prev[0], accel[1] - prev[1], accel[2] - prev[2]]) / dt
            }
            None => 0.0,
        };

        let pitch = sample.pitch();
        let roll = sample.roll();
        // +1 ms keeps the rate finite on back-to-back samples
        let (pitch_rate, roll_rate) = match self.prev_angles {
            Some((prev_pitch, prev_roll)) => (
                (pitch - prev_pitch).abs() / (dt + 0.001),
                (roll - prev_roll).abs() / (dt + 0.001),
            ),
            None => (0.0, 0.0),
        };

        self.prev_accel = Some(accel);
        self.prev_angles = Some((pitch, roll));

        DerivedMetrics {
            jerk,
            svm: magnitude(accel) / GRAVITY,
            angular_velocity: magnitude(sample.gyro()),
            pitch,
            roll,
            pitch_rate,
            roll_rate,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Resting posture captured at startup.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PostureBaseline {
    pub pitch: f32,
    pub roll: f32,
}

/// Averages stationary readings into a [`PostureBaseline`].
#[derive(Debug, Clone)]
pub struct PostureCalibrator {
    needed: usize,
    count: usize,
    pitch_sum: f32,
    roll_sum: f32,
}

impl PostureCalibrator {
    pub fn new(needed: usize) -> Self {
        Self {
            needed: needed.max(1),
            count: 0,
            pitch_sum: 0.0,
            roll_sum: 0.0,
        }
    }

    /// Add a stationary sample. Returns the baseline once enough were collected.
    pub fn push(&mut self, sample: &SensorSample) -> Option<PostureBaseline> {
        if self.count < self.needed {
            self.pitch_sum += sample.pitch();
            self.roll_sum += sample.roll();
            self.count += 1;
        }
        self.baseline()
    }

    pub fn baseline(&self) -> Option<PostureBaseline> {
        (self.count >= self.needed).then(|| PostureBaseline {
            pitch: self.pitch_sum / self.count as f32,
            roll: self.roll_sum / self.count as f32,
        })
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.count, self.needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_has_no_jerk() {
        let mut fusion = SensorFusion::new();
        let m = fusion.update(&SensorSample::new(0, [0.0, 0.0, GRAVITY], [0.0; 3]), 0.02);
        assert_eq!(m.jerk, 0.0);
        assert!((m.svm - 1.0).abs() < 1e-4, "svm at rest should be 1 g");
    }

    #[test]
    fn test_jerk_and_angular_velocity() {
        let mut fusion = SensorFusion::new();
        fusion.update(&SensorSample::new(0, [0.0, 0.0, 10.0], [0.0; 3]), 0.01);
        let m = fusion.update(&SensorSample::new(10, [3.0, 4.0, 10.0], [30.0, 40.0, 0.0]), 0.01);
        assert!((m.jerk - 500.0).abs() < 1e-2, "jerk was {}", m.jerk);
        assert!((m.angular_velocity - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_non_positive_dt_is_clamped() {
        let mut fusion = SensorFusion::new();
        fusion.update(&SensorSample::new(0, [0.0, 0.0, 10.0], [0.0; 3]), 0.01);
        let m = fusion.update(&SensorSample::new(0, [1.0, 0.0, 10.0], [0.0; 3]), 0.0);
        assert!(m.jerk.is_finite());
        assert!((m.jerk - 100.0).abs() < 1e-2);
    }

    #[test]
    fn test_calibrator_averages() {
        let mut calibrator = PostureCalibrator::new(2);
        assert!(calibrator.push(&SensorSample::new(0, [0.0, 0.0, 9.8], [0.0; 3])).is_none());
        let baseline = calibrator
            .push(&SensorSample::new(10, [0.0, 9.8, 9.8], [0.0; 3]))
            .expect("two samples complete calibration");
        assert!((baseline.pitch - 22.5).abs() < 1e-3, "pitch {}", baseline.pitch);
        assert!(baseline.roll.abs() < 1e-3);
    }
}

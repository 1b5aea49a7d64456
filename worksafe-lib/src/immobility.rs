use crate::config::ImmobilityThresholds;
use std::collections::VecDeque;

/// Statistics over a full immobility window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImmobilityAssessment {
    pub accel_variance: f32,
    pub accel_stddev: f32,
    pub gyro_variance: f32,
    pub svm_range: f32,
    /// How many of the four criteria were met
    pub criteria_met: u8,
    pub is_immobile: bool,
}

/// Sliding window of the last N `(svm, angular velocity)` samples.
#[derive(Debug, Clone)]
pub struct ImmobilityWindow {
    samples: VecDeque<(f32, f32)>,
    capacity: usize,
}

impl ImmobilityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, svm: f32, angular_velocity: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((svm, angular_velocity));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Evaluate the window. Returns `None` until it is full.
    pub fn assess(&self, thresholds: &ImmobilityThresholds) -> Option<ImmobilityAssessment> {
        if !self.is_full() {
            return None;
        }

        let n = self.samples.len() as f32;
        let svm_mean = self.samples.iter().map(|(svm, _)| svm).sum::<f32>() / n;
        let gyro_mean = self.samples.iter().map(|(_, gyro)| gyro).sum::<f32>() / n;

        let accel_variance = self
            .samples
            .iter()
            .map(|(svm, _)| (svm - svm_mean).powi(2))
            .sum::<f32>()
            / n;
        let gyro_variance = self
            .samples
            .iter()
            .map(|(_, gyro)| (gyro - gyro_mean).powi(2))
            .sum::<f32>()
            / n;

        let (min, max) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (svm, _)| {
                (lo.min(*svm), hi.max(*svm))
            });

        let accel_stddev = accel_variance.sqrt();
        let svm_range = max - min;

        let criteria_met = [
            accel_variance < thresholds.accel_variance,
            accel_stddev < thresholds.accel_stddev,
            gyro_variance < thresholds.gyro_variance,
            svm_range < thresholds.svm_range,
        ]
        .iter()
        .filter(|met| **met)
        .count() as u8;

        Some(ImmobilityAssessment {
            accel_variance,
            accel_stddev,
            gyro_variance,
            svm_range,
            criteria_met,
            is_immobile: criteria_met >= thresholds.criteria_needed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_window_never_immobile() {
        let thresholds = ImmobilityThresholds::default();
        let mut window = ImmobilityWindow::new(thresholds.window_len);
        for _ in 0..thresholds.window_len - 1 {
            window.push(1.0, 0.0);
            assert!(window.assess(&thresholds).is_none());
        }
        window.push(1.0, 0.0);
        let assessment = window.assess(&thresholds).expect("window is full");
        assert!(assessment.is_immobile);
        assert_eq!(assessment.criteria_met, 4);
    }

    #[test]
    fn test_movement_is_not_immobile() {
        let thresholds = ImmobilityThresholds::default();
        let mut window = ImmobilityWindow::new(thresholds.window_len);
        for i in 0..thresholds.window_len {
            let svm = if i % 2 == 0 { 0.6 } else { 1.4 };
            window.push(svm, 90.0 * (i % 3) as f32);
        }
        let assessment = window.assess(&thresholds).unwrap();
        assert!(!assessment.is_immobile);
        assert!((assessment.svm_range - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_window_slides() {
        let mut window = ImmobilityWindow::new(3);
        for v in [5.0, 1.0, 1.0, 1.0] {
            window.push(v, 0.0);
        }
        assert_eq!(window.len(), 3);
        let assessment = window.assess(&ImmobilityThresholds::default()).unwrap();
        assert_eq!(assessment.svm_range, 0.0, "oldest sample should have been evicted");
    }
}

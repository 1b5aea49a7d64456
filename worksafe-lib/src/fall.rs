//! Fall detection state machine.
//!
//! The detector consumes one [`SensorSample`] per tick and classifies the
//! wearer as NORMAL, WARNING, FALL_DETECTED, DANGEROUS or RECOVERY:
//!
//! ```text
//! NORMAL -> WARNING -> FALL_DETECTED -> DANGEROUS -> RECOVERY -> NORMAL
//!              |              \______________________/^
//!              +-> NORMAL (decay, timeout, bowing)
//! ```
//!
//! A fall is confirmed from a weighted score over the impact sequence,
//! rotation, posture change and jerk. After confirmation a window of
//! post-fall samples decides whether the wearer is moving again.

use crate::config::DetectorConfig;
use crate::constants::MIN_TICK_S;
use crate::fusion::{DerivedMetrics, PostureBaseline, SensorFusion, SensorSample};
use crate::immobility::ImmobilityWindow;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, info};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Display,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum FallState {
    #[default]
    Normal = 0,
    Warning = 1,
    FallDetected = 2,
    Dangerous = 3,
    Recovery = 4,
}

impl FallState {
    /// A fall has been confirmed and not yet cleared.
    pub fn is_fall(&self) -> bool {
        matches!(self, FallState::FallDetected | FallState::Dangerous)
    }
}

/// Snapshot of the detector after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FallEvent {
    pub state: FallState,
    pub timestamp_ms: u64,
    pub jerk: f32,
    pub svm: f32,
    pub angular_velocity: f32,
    pub pitch: f32,
    pub roll: f32,
    pub movement_variance: f32,
    pub movement_stddev: f32,
    pub is_immobile: bool,
    pub immobile_duration_ms: u64,
    /// Set only on the tick a fall was confirmed
    pub confirmed: bool,
    /// Counters at confirmation
    pub impact_count: u8,
    pub warning_count: u8,
    /// Raw acceleration of the tick (m/s²)
    pub accel: [f32; 3],
}

/// Result of the last confirmation scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FallScore {
    pub score: u8,
    /// Distinct criteria that contributed
    pub criteria: u8,
    pub jumping: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct PostureChange {
    changed: bool,
    rapid: bool,
}

/// Multi-criteria fall classifier. One instance per wearer.
#[derive(Debug, Clone)]
pub struct FallDetector {
    config: DetectorConfig,
    baseline: Option<PostureBaseline>,
    fusion: SensorFusion,
    state: FallState,
    last_sample_ms: Option<u64>,
    state_change_ms: u64,
    last_fall_ms: u64,
    warning_start_ms: Option<u64>,
    impact_counter: u8,
    warning_counter: u8,
    gyro_sustained_counter: u8,
    freefall_ms: Option<u64>,
    impact_ms: Option<u64>,
    rotation_seen: bool,
    window: ImmobilityWindow,
    last_window_sample_ms: Option<u64>,
    immobile_since_ms: Option<u64>,
    event: FallEvent,
    score: FallScore,
}

impl Default for FallDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl FallDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            window: ImmobilityWindow::new(config.immobility.window_len),
            config,
            baseline: None,
            fusion: SensorFusion::new(),
            state: FallState::Normal,
            last_sample_ms: None,
            state_change_ms: 0,
            last_fall_ms: 0,
            warning_start_ms: None,
            impact_counter: 0,
            warning_counter: 0,
            gyro_sustained_counter: 0,
            freefall_ms: None,
            impact_ms: None,
            rotation_seen: false,
            last_window_sample_ms: None,
            immobile_since_ms: None,
            event: FallEvent::default(),
            score: FallScore::default(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> FallState {
        self.state
    }

    pub fn latest_event(&self) -> &FallEvent {
        &self.event
    }

    pub fn last_score(&self) -> FallScore {
        self.score
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn baseline(&self) -> Option<PostureBaseline> {
        self.baseline
    }

    /// Enable the posture criteria relative to `baseline`.
    pub fn calibrate(&mut self, baseline: PostureBaseline) {
        info!(
            "Posture calibrated: pitch {:.1}°, roll {:.1}°",
            baseline.pitch, baseline.roll
        );
        self.baseline = Some(baseline);
    }

    /// Back to NORMAL with empty history. Calibration and config are kept.
    pub fn reset(&mut self) {
        let baseline = self.baseline;
        *self = Self::new(self.config);
        self.baseline = baseline;
    }

    /// Run one detection tick.
    pub fn process(&mut self, sample: &SensorSample) -> &FallEvent {
        let now = sample.timestamp_ms;
        let dt = match self.last_sample_ms {
            Some(prev) if now > prev => (now - prev) as f32 / 1000.0,
            _ => MIN_TICK_S,
        };
        self.last_sample_ms = Some(now);

        let metrics = self.fusion.update(sample, dt);
        let entry_state = self.state;

        self.event.timestamp_ms = now;
        self.event.jerk = metrics.jerk;
        self.event.svm = metrics.svm;
        self.event.angular_velocity = metrics.angular_velocity;
        self.event.pitch = metrics.pitch;
        self.event.roll = metrics.roll;
        self.event.accel = sample.accel();
        self.event.confirmed = false;

        self.track_impact(&metrics, now);
        let high_rotation = self.track_rotation(&metrics);
        let posture = self.posture_change(&metrics);

        // A tick that raised the warning never also confirms it
        if self.state == FallState::Warning && entry_state != FallState::Normal {
            self.evaluate_warning(&metrics, posture, high_rotation, now);
        }

        match self.state {
            FallState::FallDetected => {
                if now.saturating_sub(self.state_change_ms) > self.config.timing.confirmation_grace_ms {
                    self.sample_immobility(&metrics, now);
                    if self.window.is_full() {
                        let next = if self.event.is_immobile {
                            FallState::Dangerous
                        } else {
                            FallState::Recovery
                        };
                        self.transition(next, now);
                    }
                }
            }
            FallState::Dangerous => {
                self.sample_immobility(&metrics, now);
                if !self.event.is_immobile {
                    self.transition(FallState::Recovery, now);
                }
            }
            FallState::Recovery => {
                if now.saturating_sub(self.last_fall_ms) > self.config.timing.recovery_cooldown_ms {
                    self.window.clear();
                    self.last_window_sample_ms = None;
                    self.immobile_since_ms = None;
                    self.event.is_immobile = false;
                    self.event.immobile_duration_ms = 0;
                    self.transition(FallState::Normal, now);
                }
            }
            FallState::Normal | FallState::Warning => {}
        }

        self.event.state = self.state;
        &self.event
    }

    fn transition(&mut self, next: FallState, now: u64) {
        if next != self.state {
            info!("Fall state {} -> {} at {} ms", self.state, next, now);
            self.state = next;
            self.state_change_ms = now;
        }
    }

    fn raise_warning(&mut self, now: u64) {
        if self.state == FallState::Normal {
            self.transition(FallState::Warning, now);
            self.warning_start_ms = Some(now);
        }
    }

    fn track_impact(&mut self, m: &DerivedMetrics, now: u64) {
        let impact = self.config.impact;
        let window = self.config.timing.fall_sequence_window_ms;

        if m.svm < impact.svm_freefall && self.freefall_ms.is_none() {
            debug!("Free-fall phase, svm {:.2} g", m.svm);
            self.freefall_ms = Some(now);
        }
        if self.freefall_ms.is_some_and(|t| now.saturating_sub(t) > window) {
            self.freefall_ms = None;
        }

        if (m.svm > impact.svm_high || m.jerk > impact.jerk_high) && self.impact_ms.is_none() {
            self.impact_ms = Some(now);
            let after_freefall = self
                .freefall_ms
                .is_some_and(|t| now.saturating_sub(t) < window);
            let step = if after_freefall { 2 } else { 1 };
            self.impact_counter = self.impact_counter.saturating_add(step);
            debug!(
                "Impact svm {:.2} g jerk {:.0}, after free-fall: {}",
                m.svm, m.jerk, after_freefall
            );
            self.raise_warning(now);
        }
        if self.impact_ms.is_some_and(|t| now.saturating_sub(t) > window) {
            self.impact_ms = None;
        }

        let medium_jerk = m.jerk > impact.jerk_medium;
        let low_jerk = m.jerk > impact.jerk_low;

        if m.svm > impact.svm_impact_peak {
            self.impact_counter = self.impact_counter.saturating_add(2);
            self.raise_warning(now);
        } else if medium_jerk || m.svm > impact.svm_warning {
            self.warning_counter = self.warning_counter.saturating_add(1);
            if self.warning_counter >= self.config.counts.warning {
                self.raise_warning(now);
            }
        } else if low_jerk && self.state == FallState::Warning {
            self.warning_counter = self.warning_counter.saturating_add(1);
        } else {
            self.impact_counter = self.impact_counter.saturating_sub(1);
            self.warning_counter = self.warning_counter.saturating_sub(1);
            if self.state == FallState::Warning
                && self.impact_counter == 0
                && self.warning_counter == 0
            {
                self.warning_start_ms = None;
                self.transition(FallState::Normal, now);
            }
        }
    }

    /// Returns whether rotation is above the combined threshold.
    fn track_rotation(&mut self, m: &DerivedMetrics) -> bool {
        let rotation = &self.config.rotation;
        if m.angular_velocity > rotation.sustained {
            self.gyro_sustained_counter = self.gyro_sustained_counter.saturating_add(1);
            self.rotation_seen = true;
        } else {
            self.gyro_sustained_counter = self.gyro_sustained_counter.saturating_sub(1);
        }
        m.angular_velocity > rotation.combined
    }

    fn posture_change(&self, m: &DerivedMetrics) -> PostureChange {
        let Some(baseline) = self.baseline else {
            return PostureChange::default();
        };
        let limits = &self.config.posture;
        let pitch_change = (m.pitch - baseline.pitch).abs();
        let roll_change = (m.roll - baseline.roll).abs();

        PostureChange {
            changed: pitch_change > limits.pitch || roll_change > limits.roll,
            rapid: pitch_change > limits.rapid_change
                || roll_change > limits.rapid_change
                || m.pitch_rate > limits.pitch_rate
                || m.roll_rate > limits.roll_rate,
        }
    }

    fn evaluate_warning(
        &mut self,
        m: &DerivedMetrics,
        posture: PostureChange,
        high_rotation: bool,
        now: u64,
    ) {
        let timing = self.config.timing;
        let duration = self
            .warning_start_ms
            .map_or(0, |start| now.saturating_sub(start));

        if self.baseline.is_some()
            && duration > timing.bowing_rejection_ms
            && self.gyro_sustained_counter == 0
            && self.freefall_ms.is_none()
            && !posture.rapid
        {
            info!("Slow posture change without rotation after {} ms, treating as bowing", duration);
            self.clear_to_normal(now);
            return;
        }

        let score = self.score(m, posture, high_rotation);
        self.score = score;
        let weights = self.config.scoring;

        let strong = score.score >= weights.strong_cutoff;
        let moderate =
            score.score >= weights.moderate_cutoff && score.criteria >= weights.moderate_criteria;

        if strong || moderate {
            if score.jumping && !strong {
                debug!("Marginal score {} while jumping, not confirming", score.score);
            } else {
                self.confirm(score, now);
            }
        } else if duration > timing.fall_sequence_window_ms && score.score < weights.moderate_cutoff
        {
            debug!("Warning timed out with score {}", score.score);
            self.clear_to_normal(now);
        }
    }

    fn score(&self, m: &DerivedMetrics, posture: PostureChange, high_rotation: bool) -> FallScore {
        let weights = &self.config.scoring;
        let window = self.config.timing.fall_sequence_window_ms;
        let mut score = FallScore {
            jumping: self.freefall_ms.is_some()
                && !self.rotation_seen
                && self.gyro_sustained_counter == 0,
            ..FallScore::default()
        };
        let mut add = |weight: u8| {
            score.score = score.score.saturating_add(weight);
            score.criteria += 1;
        };

        if self.impact_counter >= self.config.counts.impact {
            let sequence = matches!(
                (self.freefall_ms, self.impact_ms),
                (Some(fall), Some(impact)) if impact >= fall && impact - fall < window
            );
            add(if sequence { weights.impact_sequence } else { weights.impact });
        }

        if self.gyro_sustained_counter >= self.config.counts.gyro_sustained {
            add(weights.sustained_rotation);
        } else if high_rotation {
            add(weights.high_rotation);
        }

        if posture.rapid {
            add(weights.rapid_posture);
        } else if posture.changed {
            add(weights.posture);
        }

        if m.jerk > self.config.impact.jerk_high {
            add(weights.jerk);
        }

        if self.freefall_ms.is_some() && self.impact_ms.is_some() && self.rotation_seen {
            add(weights.full_sequence);
        }

        score
    }

    fn confirm(&mut self, score: FallScore, now: u64) {
        info!(
            "FALL CONFIRMED: score {} from {} criteria",
            score.score, score.criteria
        );
        self.event.impact_count = self.impact_counter;
        self.event.warning_count = self.warning_counter;
        self.event.confirmed = true;
        self.transition(FallState::FallDetected, now);
        self.last_fall_ms = now;
        self.clear_evidence();
    }

    fn clear_to_normal(&mut self, now: u64) {
        self.clear_evidence();
        self.transition(FallState::Normal, now);
    }

    fn clear_evidence(&mut self) {
        self.impact_counter = 0;
        self.warning_counter = 0;
        self.gyro_sustained_counter = 0;
        self.freefall_ms = None;
        self.impact_ms = None;
        self.rotation_seen = false;
        self.warning_start_ms = None;
    }

    fn sample_immobility(&mut self, m: &DerivedMetrics, now: u64) {
        if self
            .last_window_sample_ms
            .is_some_and(|last| now.saturating_sub(last) < self.config.timing.immobility_interval_ms)
        {
            return;
        }
        self.last_window_sample_ms = Some(now);
        self.window.push(m.svm, m.angular_velocity);

        let Some(assessment) = self.window.assess(&self.config.immobility) else {
            self.event.is_immobile = false;
            return;
        };

        self.event.movement_variance = assessment.accel_variance;
        self.event.movement_stddev = assessment.accel_stddev;
        self.event.is_immobile = assessment.is_immobile;

        if assessment.is_immobile {
            let since = *self.immobile_since_ms.get_or_insert(now);
            self.event.immobile_duration_ms = now - since;
        } else {
            self.immobile_since_ms = None;
            self.event.immobile_duration_ms = 0;
        }
    }
}

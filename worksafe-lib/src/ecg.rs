//! Single-lead ECG processing at 100 Hz: R-peak heart rate, differential
//! compression for the ECG payload, and PQRST feature extraction.

use crate::config::VitalThresholds;
use crate::constants::COMPRESSED_ECG_SIZE;
use crate::payload::{EcgPayload, Pqrst};
use tracing::debug;

/// Two seconds of samples at 100 Hz
pub const ECG_BUFFER_LEN: usize = 200;
pub const ECG_SAMPLE_PERIOD_MS: u64 = 10;
/// 12-bit ADC midpoint
pub const ECG_MIDPOINT: i32 = 2048;

const THRESHOLD_PERCENT: i32 = 60;
const REFRACTORY_MS: u64 = 300;
const BEAT_TIMEOUT_MS: u64 = 3000;
const DOWNSAMPLE: u8 = 4;

#[derive(Debug, Clone)]
pub struct EcgProcessor {
    ring: [i32; ECG_BUFFER_LEN],
    index: usize,
    baseline: i32,
    last_beat_ms: Option<u64>,
    last_peak: Option<usize>,
    bpm: u16,
    rr_interval_ms: Option<u64>,
    valid_bpm: (u16, u16),
    leads_off: bool,
    compressed: [u8; COMPRESSED_ECG_SIZE],
    compressed_index: usize,
    downsample_counter: u8,
    last_compressed: i32,
    pqrst: Option<Pqrst>,
}

impl EcgProcessor {
    pub fn new(thresholds: &VitalThresholds) -> Self {
        Self {
            ring: [ECG_MIDPOINT; ECG_BUFFER_LEN],
            index: 0,
            baseline: ECG_MIDPOINT,
            last_beat_ms: None,
            last_peak: None,
            bpm: 0,
            rr_interval_ms: None,
            valid_bpm: (thresholds.hr_valid_min, thresholds.hr_valid_max),
            leads_off: true,
            compressed: [128; COMPRESSED_ECG_SIZE],
            compressed_index: 0,
            downsample_counter: 0,
            last_compressed: ECG_MIDPOINT,
            pqrst: None,
        }
    }

    /// Heart rate, 0 when there is no signal.
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn leads_off(&self) -> bool {
        self.leads_off
    }

    pub fn baseline(&self) -> i32 {
        self.baseline
    }

    pub fn rr_interval_ms(&self) -> Option<u64> {
        self.rr_interval_ms
    }

    /// Feed one ADC reading; `None` means the electrodes are disconnected.
    pub fn push(&mut self, reading: Option<u16>, now_ms: u64) {
        let Some(value) = reading else {
            if !self.leads_off {
                debug!("ECG leads off");
            }
            self.leads_off = true;
            self.bpm = 0;
            return;
        };
        self.leads_off = false;
        let value = value as i32;

        let position = self.index;
        self.ring[position] = value;
        self.index = (self.index + 1) % ECG_BUFFER_LEN;

        let (sum, min, max) = self
            .ring
            .iter()
            .fold((0i64, i32::MAX, i32::MIN), |(sum, lo, hi), &v| {
                (sum + v as i64, lo.min(v), hi.max(v))
            });
        self.baseline = (sum / ECG_BUFFER_LEN as i64) as i32;
        let threshold = self.baseline + (max - min) * THRESHOLD_PERCENT / 100;

        let refractory_over = self
            .last_beat_ms
            .is_none_or(|last| now_ms.saturating_sub(last) > REFRACTORY_MS);
        if value > threshold && refractory_over {
            if let Some(last) = self.last_beat_ms {
                let interval = now_ms - last;
                let bpm = 60_000 / interval;
                if (self.valid_bpm.0 as u64..=self.valid_bpm.1 as u64).contains(&bpm) {
                    self.bpm = bpm as u16;
                    self.rr_interval_ms = Some(interval);
                    debug!("R peak, {} bpm", bpm);
                }
            }
            self.last_beat_ms = Some(now_ms);
            self.last_peak = Some(position);
        }

        if self
            .last_beat_ms
            .is_some_and(|last| now_ms.saturating_sub(last) > BEAT_TIMEOUT_MS)
        {
            self.bpm = 0;
        }

        self.downsample_counter += 1;
        if self.downsample_counter >= DOWNSAMPLE {
            self.downsample_counter = 0;
            let diff = ((value - self.last_compressed) / 4).clamp(-128, 127);
            self.compressed[self.compressed_index] = (diff + 128) as u8;
            self.compressed_index = (self.compressed_index + 1) % COMPRESSED_ECG_SIZE;
            self.last_compressed = value;
        }
    }

    /// Compressed strip, oldest sample first.
    pub fn compressed(&self) -> [u8; COMPRESSED_ECG_SIZE] {
        let mut out = [0u8; COMPRESSED_ECG_SIZE];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.compressed[(self.compressed_index + i) % COMPRESSED_ECG_SIZE];
        }
        out
    }

    fn at(&self, peak: usize, offset: isize) -> i32 {
        let n = ECG_BUFFER_LEN as isize;
        self.ring[((peak as isize + offset).rem_euclid(n)) as usize]
    }

    /// Locate P, Q, S and T around the most recent R peak. Clears the
    /// features when no beat with a valid rate has been seen.
    pub fn extract_pqrst(&mut self) -> Option<Pqrst> {
        let (Some(peak), Some(beat_ms)) = (self.last_peak, self.last_beat_ms) else {
            self.pqrst = None;
            return None;
        };
        if self.bpm == 0 {
            self.pqrst = None;
            return None;
        }

        let newest = (self.index + ECG_BUFFER_LEN - 1) % ECG_BUFFER_LEN;
        let after_peak = ((newest + ECG_BUFFER_LEN - peak) % ECG_BUFFER_LEN) as isize;
        let r = self.at(peak, 0);

        // (offset from R, value) of the lowest sample within the range
        let lowest = |range: std::ops::RangeInclusive<isize>| {
            range
                .map(|off| (off, self.at(peak, off)))
                .fold((0, r), |best, cur| if cur.1 < best.1 { cur } else { best })
        };
        let (q_off, q) = lowest(-10..=-1);
        let (s_off, s) = lowest(1..=10.min(after_peak));

        // Small peaks below R, starting from the baseline
        let highest = |range: std::ops::RangeInclusive<isize>, start: isize| {
            range
                .map(|off| (off, self.at(peak, off)))
                .filter(|(_, v)| *v < r)
                .fold((start, self.baseline), |best, cur| {
                    if cur.1 > best.1 { cur } else { best }
                })
        };
        let (_, p) = highest(q_off - 25..=q_off - 5, q_off);
        let (t_off, t) = highest(s_off + 10..=(s_off + 40).min(after_peak), s_off);

        let ms = |samples: isize| (samples.unsigned_abs() as u64 * ECG_SAMPLE_PERIOD_MS).min(255) as u8;
        let amplitude = |v: i32| (v - self.baseline).clamp(i16::MIN as i32, i16::MAX as i32) as i16;

        let features = Pqrst {
            timestamp: (beat_ms & 0xFFFF) as u16,
            p: amplitude(p),
            q: amplitude(q),
            r: amplitude(r),
            s: amplitude(s),
            t: amplitude(t),
            qrs_width_ms: ms(s_off - q_off),
            qt_interval_ms: ms(t_off - q_off),
        };
        self.pqrst = Some(features);
        Some(features)
    }

    pub fn pqrst(&self) -> Option<Pqrst> {
        self.pqrst
    }

    /// ECG payload from the current strip and the last extracted features.
    pub fn payload(&self) -> EcgPayload {
        EcgPayload {
            samples: self.compressed(),
            pqrst: self.pqrst.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat line with one-sample R spikes every `period` samples.
    fn feed(ecg: &mut EcgProcessor, samples: u64, period: u64, start_ms: u64) -> u64 {
        let mut t = start_ms;
        for i in 0..samples {
            let value = if i % period == period / 2 { 3000 } else { 2048 };
            ecg.push(Some(value), t);
            t += ECG_SAMPLE_PERIOD_MS;
        }
        t
    }

    #[test]
    fn test_heart_rate_from_spikes() {
        let mut ecg = EcgProcessor::new(&VitalThresholds::default());
        feed(&mut ecg, 500, 80, 0);
        assert_eq!(ecg.bpm(), 75);
        assert_eq!(ecg.rr_interval_ms(), Some(800));
        assert!(!ecg.leads_off());
    }

    #[test]
    fn test_rate_resets_without_beats() {
        let mut ecg = EcgProcessor::new(&VitalThresholds::default());
        let t = feed(&mut ecg, 300, 80, 0);
        assert_eq!(ecg.bpm(), 75);
        feed(&mut ecg, 400, 10_000, t);
        assert_eq!(ecg.bpm(), 0);
    }

    #[test]
    fn test_leads_off_clears_rate() {
        let mut ecg = EcgProcessor::new(&VitalThresholds::default());
        let t = feed(&mut ecg, 300, 80, 0);
        ecg.push(None, t);
        assert!(ecg.leads_off());
        assert_eq!(ecg.bpm(), 0);
    }

    #[test]
    fn test_compression_differences() {
        let mut ecg = EcgProcessor::new(&VitalThresholds::default());
        // flat, then a step of +100 and a step of -1000
        for (i, value) in [2048u16, 2048, 2048, 2148, 2148, 2148, 2148, 1148]
            .into_iter()
            .enumerate()
        {
            ecg.push(Some(value), i as u64 * ECG_SAMPLE_PERIOD_MS);
        }
        let strip = ecg.compressed();
        assert_eq!(strip[COMPRESSED_ECG_SIZE - 2], 128 + 25);
        assert_eq!(strip[COMPRESSED_ECG_SIZE - 1], 0, "-250 clips to -128");
        assert!(strip[..COMPRESSED_ECG_SIZE - 2].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_pqrst_around_peak() {
        let mut ecg = EcgProcessor::new(&VitalThresholds::default());
        assert!(ecg.extract_pqrst().is_none());

        let mut t = feed(&mut ecg, 300, 80, 0);
        // One shaped beat: P bump, Q dip, R, S dip, T bump
        let mut beat = vec![2048u16; 60];
        beat[5] = 2150; // P
        beat[15] = 1900; // Q
        beat[18] = 3000; // R
        beat[21] = 1850; // S
        beat[40] = 2300; // T
        // keep the previous synthetic beat 80 samples earlier for a valid rate
        let gap = 80 - (300 % 80) + 40 - 18;
        for _ in 0..gap {
            ecg.push(Some(2048), t);
            t += ECG_SAMPLE_PERIOD_MS;
        }
        for value in beat {
            ecg.push(Some(value), t);
            t += ECG_SAMPLE_PERIOD_MS;
        }

        let features = ecg.extract_pqrst().expect("valid beat");
        assert!(features.r > 800);
        assert!(features.q < 0 && features.s < 0);
        assert!(features.p > 0 && features.t > 0);
        assert_eq!(features.qrs_width_ms, 60);
        assert_eq!(features.qt_interval_ms, 250);
        assert_eq!(ecg.payload().pqrst, features);
    }
}

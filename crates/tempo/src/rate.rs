//! Silence-adaptive playback rate.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Loudness below which `SpeedUp` kicks in, in dBFS.
pub const SPEED_UP_THRESHOLD_DB: f32 = -35.0;

/// Rate used by `SpeedUp` while the signal is quiet.
pub const SPEED_UP_RATE: f32 = 3.0;

/// Samples kept by `Smart` before it adjusts anything.
///
/// `Smart` adjusts on the sample that fills the window, the 10th. Players that
/// wait for strictly more than ten samples adjust one buffer later.
pub const HISTORY_WINDOW: usize = 10;

/// `Smart` works on a positive scale: dBFS shifted by this amount.
const LOUDNESS_SHIFT_DB: f32 = 120.0;
const QUIET_CUTOFF: f32 = 50.0;
const LOUD_CUTOFF: f32 = 100.0;
const QUIET_COEFFICIENT: f32 = 0.02;
const MODERATE_COEFFICIENT: f32 = 0.01;

/// Range accepted for the global gain, in dB.
pub const GLOBAL_GAIN_RANGE: std::ops::RangeInclusive<f32> = -96.0..=24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceMode {
    #[default]
    None,
    /// Fixed fast rate whenever the signal is below the threshold.
    SpeedUp,
    /// Rate follows how far the latest sample sits below the recent peak.
    Smart,
}

/// Bounded window of shifted loudness samples, oldest evicted first.
#[derive(Debug, Clone, Default)]
pub struct AmplitudeHistory {
    samples: VecDeque<f32>,
}

impl AmplitudeHistory {
    pub fn push(&mut self, sample: f32) {
        self.samples.push_back(sample);
        while self.samples.len() > HISTORY_WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= HISTORY_WINDOW
    }

    pub fn last(&self) -> Option<f32> {
        self.samples.back().copied()
    }

    pub fn max(&self) -> Option<f32> {
        self.samples.iter().copied().reduce(f32::max)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// A rate chosen by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub rate: f32,
    /// Playback seconds the buffer takes less at `rate` than at base rate.
    /// `None` when the controller only restored the base rate.
    pub seconds_saved: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RateController {
    mode: SilenceMode,
    base_rate: f32,
    rate: f32,
    global_gain: f32,
    history: AmplitudeHistory,
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(SilenceMode::None, 1.0)
    }
}

impl RateController {
    pub fn new(mode: SilenceMode, base_rate: f32) -> Self {
        Self {
            mode,
            base_rate,
            rate: base_rate,
            global_gain: 0.0,
            history: AmplitudeHistory::default(),
        }
    }

    pub fn mode(&self) -> SilenceMode {
        self.mode
    }

    pub fn base_rate(&self) -> f32 {
        self.base_rate
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn global_gain(&self) -> f32 {
        self.global_gain
    }

    pub fn history(&self) -> &AmplitudeHistory {
        &self.history
    }

    /// Forget the history and fall back to the base rate.
    pub fn reset(&mut self) -> f32 {
        self.history.clear();
        self.rate = self.base_rate;
        self.rate
    }

    pub fn set_mode(&mut self, mode: SilenceMode) -> f32 {
        self.mode = mode;
        self.reset()
    }

    pub fn set_base_rate(&mut self, base_rate: f32) -> f32 {
        self.base_rate = base_rate;
        self.reset()
    }

    /// Returns `false` and keeps the old gain when `gain` is out of range.
    pub fn set_global_gain(&mut self, gain: f32) -> bool {
        if !GLOBAL_GAIN_RANGE.contains(&gain) {
            return false;
        }
        self.global_gain = gain;
        self.reset();
        true
    }

    /// Feed one per-buffer loudness sample (dBFS). `None` freezes the rate.
    pub fn observe(&mut self, loudness: Option<f32>, seconds_per_buffer: f64) -> Option<RateDecision> {
        let loudness = loudness?;
        match self.mode {
            SilenceMode::None => None,
            SilenceMode::SpeedUp => {
                if loudness < SPEED_UP_THRESHOLD_DB {
                    self.rate = SPEED_UP_RATE;
                    Some(RateDecision {
                        rate: self.rate,
                        seconds_saved: Some(seconds_saved(seconds_per_buffer, self.rate)),
                    })
                } else {
                    self.rate = self.base_rate;
                    Some(RateDecision {
                        rate: self.rate,
                        seconds_saved: None,
                    })
                }
            }
            SilenceMode::Smart => {
                if !loudness.is_finite() {
                    return None;
                }
                self.history.push(loudness + LOUDNESS_SHIFT_DB);
                if !self.history.is_full() {
                    return None;
                }
                let last = self.history.last()?;
                let max = self.history.max()?;

                let rate = if last > LOUD_CUTOFF + self.global_gain {
                    self.base_rate
                } else if last > QUIET_CUTOFF + self.global_gain {
                    self.base_rate + (max - last) * MODERATE_COEFFICIENT
                } else {
                    self.base_rate + (max - last) * QUIET_COEFFICIENT
                };
                trace!(last, max, rate, "Smart rate adjustment");
                self.rate = rate;
                Some(RateDecision {
                    rate,
                    seconds_saved: Some(seconds_saved(seconds_per_buffer, rate)),
                })
            }
        }
    }
}

/// `interval - interval / rate`.
pub fn seconds_saved(seconds_per_buffer: f64, rate: f32) -> f64 {
    if rate <= 0.0 {
        return 0.0;
    }
    seconds_per_buffer - seconds_per_buffer / f64::from(rate)
}

/// RMS of `samples` in dBFS, `None` for an empty slice.
pub fn channel_loudness_db(samples: &[f32]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum / samples.len() as f32).sqrt();
    Some(20.0 * rms.log10())
}

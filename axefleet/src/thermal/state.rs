//! Mutable per-device thermal control state.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::profile::ThermalProfile;

/// How much history to retain for trend and averaging queries.
const HISTORY_WINDOW: Duration = Duration::from_secs(3600);

/// One retained telemetry point.
#[derive(Debug, Clone, Copy)]
pub struct HistorySample {
    pub at: Instant,
    pub temp_c: f32,
    pub freq_mhz: u16,
}

/// Everything the controller mutates for one device.
#[derive(Debug)]
pub struct ThermalState {
    /// Last frequency the controller commanded. Zero only during an
    /// emergency shutdown / cooldown.
    pub current_freq_mhz: u16,
    pub current_temp_c: f32,
    pub previous_temp_c: f32,
    /// Degrees per sample, positive when heating.
    pub temp_trend_c: f32,
    pub auto_tune_enabled: bool,
    pub cooldown_started_at: Option<Instant>,
    pub last_adjustment_at: Option<Instant>,
    history: VecDeque<HistorySample>,
}

impl ThermalState {
    pub fn new(profile: &ThermalProfile) -> Self {
        Self {
            current_freq_mhz: profile.default_freq_mhz,
            current_temp_c: 0.0,
            previous_temp_c: 0.0,
            temp_trend_c: 0.0,
            auto_tune_enabled: true,
            cooldown_started_at: None,
            last_adjustment_at: None,
            history: VecDeque::new(),
        }
    }

    /// Fold a new reading into the state and history. The trend is the
    /// sample-to-sample delta once two real readings exist.
    pub fn record_temperature(&mut self, temp_c: f32, now: Instant) {
        self.previous_temp_c = self.current_temp_c;
        self.current_temp_c = temp_c;
        if self.previous_temp_c > 0.0 {
            self.temp_trend_c = self.current_temp_c - self.previous_temp_c;
        }

        self.history.push_back(HistorySample {
            at: now,
            temp_c,
            freq_mhz: self.current_freq_mhz,
        });
        let cutoff = now.checked_sub(HISTORY_WINDOW);
        while let (Some(front), Some(cutoff)) = (self.history.front(), cutoff) {
            if front.at >= cutoff {
                break;
            }
            self.history.pop_front();
        }
    }

    /// Average temperature over the trailing window, if any samples
    /// landed inside it.
    pub fn average_temp(&self, window: Duration, now: Instant) -> Option<f32> {
        let cutoff = now.checked_sub(window);
        let mut sum = 0.0;
        let mut count = 0usize;
        for sample in self.history.iter().rev() {
            if cutoff.is_some_and(|cutoff| sample.at < cutoff) {
                break;
            }
            sum += sample.temp_c;
            count += 1;
        }
        (count > 0).then(|| sum / count as f32)
    }

    pub fn history(&self) -> impl Iterator<Item = &HistorySample> {
        self.history.iter()
    }

    /// Restore defaults after a manual reset: stock frequency, auto-tune
    /// back on, no pending cooldown. History is retained.
    pub fn reset(&mut self, profile: &ThermalProfile) {
        self.current_freq_mhz = profile.default_freq_mhz;
        self.auto_tune_enabled = true;
        self.cooldown_started_at = None;
        self.last_adjustment_at = None;
        self.temp_trend_c = 0.0;
    }
}

//! Thermal decision ladder.
//!
//! One controller per managed device. The orchestrator feeds it the
//! temperature from each poll; the controller answers with a fan duty
//! and a frequency action, which the orchestrator applies to the device
//! (fan first, then frequency).
//!
//! The ladder is evaluated strictly in order on every sample:
//!
//! ```text
//!   cooldown active?      -> hold at zero until it expires
//!   temp >= critical      -> emergency stop, start cooldown
//!   auto-tune disabled?   -> hold
//!   adjusted recently?    -> hold (rate limit)
//!   temp >= warning       -> down two steps
//!   temp >  optimal+hyst  -> down one step
//!   temp <  optimal-hyst  -> up one step, unless still heating
//!   otherwise             -> hold
//! ```
//!
//! Frequency targets always clamp to the profile envelope. Fan duty is
//! recomputed on every sample and is never rate-limited.

use std::time::Duration;

use tokio::time::Instant;

use super::profile::ThermalProfile;
use super::state::ThermalState;
use crate::tracing::prelude::*;

const FAN_SPEED_QUIET: u8 = 35;
const FAN_SPEED_ELEVATED: u8 = 60;
const FAN_SPEED_WARNING: u8 = 85;
const FAN_SPEED_MAX: u8 = 100;

/// Default cooldown after an emergency shutdown.
const COOLDOWN_DURATION: Duration = Duration::from_secs(600);

/// Default spacing between frequency adjustments, letting thermal
/// changes settle before the next move.
const ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(30);

/// Max per-sample temperature rise that still allows a frequency bump.
const MAX_HEATING_TREND_C: f32 = 1.0;

/// Readings are clamped into this band; sensors occasionally glitch but
/// the controller never errors on a finite value.
const TEMP_CLAMP_MIN_C: f32 = -20.0;
const TEMP_CLAMP_MAX_C: f32 = 110.0;

/// Observable controller condition, for health reporting and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ControlState {
    Normal,
    Warning,
    EmergencyShutdown,
    Cooldown,
}

/// What to do with the device's frequency this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyAction {
    Hold,
    Set(u16),
    /// Drop to the lowest safe frequency immediately; these devices
    /// cannot be powered off over the network.
    EmergencyStop,
}

/// Outcome of one control sample.
#[derive(Debug, Clone)]
pub struct ThermalDecision {
    pub frequency: FrequencyAction,
    pub fan_percent: u8,
    pub state: ControlState,
    pub reason: String,
}

pub struct ThermalController {
    profile: ThermalProfile,
    state: ThermalState,
    cooldown_duration: Duration,
    adjustment_interval: Duration,
    /// Fleet-wide kill switch, pushed down by the orchestrator. Gates
    /// the tuning rungs only; emergency protection always runs.
    global_auto_tune_enabled: bool,
}

impl ThermalController {
    pub fn new(profile: ThermalProfile) -> Self {
        Self::with_timing(profile, COOLDOWN_DURATION, ADJUSTMENT_INTERVAL)
    }

    pub fn with_timing(
        profile: ThermalProfile,
        cooldown_duration: Duration,
        adjustment_interval: Duration,
    ) -> Self {
        Self {
            state: ThermalState::new(&profile),
            profile,
            cooldown_duration,
            adjustment_interval,
            global_auto_tune_enabled: true,
        }
    }

    pub fn profile(&self) -> &ThermalProfile {
        &self.profile
    }

    pub fn current_frequency(&self) -> u16 {
        self.state.current_freq_mhz
    }

    pub fn auto_tune_enabled(&self) -> bool {
        self.state.auto_tune_enabled
    }

    pub fn control_state(&self) -> ControlState {
        if self.state.cooldown_started_at.is_some() {
            ControlState::Cooldown
        } else if self.state.current_freq_mhz == 0 {
            ControlState::EmergencyShutdown
        } else if self.state.current_temp_c >= self.profile.warning_temp_c {
            ControlState::Warning
        } else {
            ControlState::Normal
        }
    }

    /// Run one rung-by-rung pass of the ladder for a new telemetry
    /// sample. A missing or non-finite reading leaves all state
    /// untouched.
    pub fn on_sample(&mut self, temp_c: Option<f32>) -> ThermalDecision {
        let now = Instant::now();

        let Some(temp) = temp_c.filter(|t| t.is_finite()) else {
            return self.decide(
                FrequencyAction::Hold,
                self.fan_for(self.state.current_temp_c),
                "no usable temperature reading".to_string(),
            );
        };
        let temp = temp.clamp(TEMP_CLAMP_MIN_C, TEMP_CLAMP_MAX_C);
        self.state.record_temperature(temp, now);

        if let Some(started) = self.state.cooldown_started_at {
            let elapsed = now.duration_since(started);
            if elapsed < self.cooldown_duration {
                let remaining = self.cooldown_duration - elapsed;
                return self.decide(
                    FrequencyAction::Hold,
                    FAN_SPEED_MAX,
                    format!("cooling down, {}s remaining", remaining.as_secs()),
                );
            }
            self.state.cooldown_started_at = None;
            if temp < self.profile.critical_temp_c {
                self.state.current_freq_mhz = self.profile.default_freq_mhz;
                self.state.last_adjustment_at = Some(now);
                info!(
                    freq_mhz = self.state.current_freq_mhz,
                    temp_c = temp,
                    "Cooldown complete, restoring default frequency"
                );
                return self.decide(
                    FrequencyAction::Set(self.state.current_freq_mhz),
                    self.fan_for(temp),
                    "cooldown complete, restoring default frequency".to_string(),
                );
            }
            // Still critical after a full cooldown; fall through and
            // trigger a fresh emergency stop.
        }

        if temp >= self.profile.critical_temp_c {
            self.state.current_freq_mhz = 0;
            self.state.cooldown_started_at = Some(now);
            self.state.last_adjustment_at = Some(now);
            warn!(
                temp_c = temp,
                critical_c = self.profile.critical_temp_c,
                "Emergency shutdown"
            );
            return self.decide(
                FrequencyAction::EmergencyStop,
                FAN_SPEED_MAX,
                format!(
                    "EMERGENCY: temperature {temp:.1}C at or above critical {:.1}C",
                    self.profile.critical_temp_c
                ),
            );
        }

        if !self.global_auto_tune_enabled {
            return self.decide(
                FrequencyAction::Hold,
                self.fan_for(temp),
                "auto-tune disabled fleet-wide".to_string(),
            );
        }

        if !self.state.auto_tune_enabled {
            return self.decide(
                FrequencyAction::Hold,
                self.fan_for(temp),
                "auto-tune disabled".to_string(),
            );
        }

        if let Some(last) = self.state.last_adjustment_at {
            let since = now.duration_since(last);
            if since < self.adjustment_interval {
                return self.decide(
                    FrequencyAction::Hold,
                    self.fan_for(temp),
                    format!("holding, adjusted {}s ago", since.as_secs()),
                );
            }
        }

        let current = self.state.current_freq_mhz;
        let step = self.profile.freq_step_mhz;
        let (target, reason) = if temp >= self.profile.warning_temp_c {
            (
                current.saturating_sub(2 * step),
                format!(
                    "temperature {temp:.1}C at or above warning {:.1}C, backing off hard",
                    self.profile.warning_temp_c
                ),
            )
        } else if temp > self.profile.optimal_temp_c + self.profile.hysteresis_c {
            (
                current.saturating_sub(step),
                format!("temperature {temp:.1}C above optimal band, stepping down"),
            )
        } else if temp < self.profile.optimal_temp_c - self.profile.hysteresis_c {
            if self.state.temp_trend_c <= MAX_HEATING_TREND_C {
                (
                    current.saturating_add(step),
                    format!("temperature {temp:.1}C below optimal band, stepping up"),
                )
            } else {
                (
                    current,
                    format!(
                        "below optimal band but heating {:+.1}C/sample, holding",
                        self.state.temp_trend_c
                    ),
                )
            }
        } else {
            (current, format!("temperature {temp:.1}C in optimal band"))
        };

        let target = self.profile.clamp_frequency(target);
        if target == current {
            return self.decide(FrequencyAction::Hold, self.fan_for(temp), reason);
        }

        self.state.current_freq_mhz = target;
        self.state.last_adjustment_at = Some(now);
        info!(
            from_mhz = current,
            to_mhz = target,
            temp_c = temp,
            "Frequency adjustment"
        );
        self.decide(FrequencyAction::Set(target), self.fan_for(temp), reason)
    }

    /// Pin the device at a frequency and stop tuning it. The value is
    /// clamped to the profile envelope; the clamped value is returned.
    pub fn force_frequency(&mut self, mhz: u16) -> u16 {
        let clamped = self.profile.clamp_frequency(mhz);
        self.state.current_freq_mhz = clamped;
        self.state.auto_tune_enabled = false;
        clamped
    }

    /// Apply a schedule cap without touching auto-tune. Returns the
    /// clamped value actually adopted.
    pub fn cap_frequency(&mut self, mhz: u16) -> u16 {
        let clamped = self.profile.clamp_frequency(mhz);
        self.state.current_freq_mhz = clamped;
        clamped
    }

    pub fn set_auto_tune(&mut self, enabled: bool) {
        self.state.auto_tune_enabled = enabled;
    }

    pub fn set_global_auto_tune(&mut self, enabled: bool) {
        self.global_auto_tune_enabled = enabled;
    }

    /// Back to stock: default frequency, auto-tune on, cooldown cleared.
    pub fn reset(&mut self) {
        self.state.reset(&self.profile);
    }

    fn fan_for(&self, temp_c: f32) -> u8 {
        if self.state.cooldown_started_at.is_some() || temp_c >= self.profile.critical_temp_c {
            FAN_SPEED_MAX
        } else if temp_c >= self.profile.warning_temp_c {
            FAN_SPEED_WARNING
        } else if temp_c > self.profile.optimal_temp_c + self.profile.hysteresis_c {
            FAN_SPEED_ELEVATED
        } else {
            FAN_SPEED_QUIET
        }
    }

    fn decide(&self, frequency: FrequencyAction, fan_percent: u8, reason: String) -> ThermalDecision {
        ThermalDecision {
            frequency,
            fan_percent,
            state: self.control_state(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn test_profile() -> ThermalProfile {
        ThermalProfile {
            min_freq_mhz: 400,
            max_freq_mhz: 600,
            default_freq_mhz: 490,
            optimal_temp_c: 60.0,
            warning_temp_c: 65.0,
            critical_temp_c: 70.0,
            max_chip_temp_c: 75.0,
            hysteresis_c: 2.0,
            freq_step_mhz: 10,
        }
    }

    fn controller() -> ThermalController {
        ThermalController::new(test_profile())
    }

    #[tokio::test(start_paused = true)]
    async fn should_walk_the_ladder_through_a_heating_episode() {
        let mut c = controller();

        // In the optimal band: hold at the default.
        let d = c.on_sample(Some(60.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);
        assert_eq!(c.current_frequency(), 490);

        // Warning band: back off two steps at once.
        advance(Duration::from_secs(30)).await;
        let d = c.on_sample(Some(66.0));
        assert_eq!(d.frequency, FrequencyAction::Set(470));

        // Still in the warning band after the rate limit: two more.
        advance(Duration::from_secs(30)).await;
        let d = c.on_sample(Some(69.0));
        assert_eq!(d.frequency, FrequencyAction::Set(450));

        // Critical: emergency stop, fan to maximum.
        advance(Duration::from_secs(30)).await;
        let d = c.on_sample(Some(72.0));
        assert_eq!(d.frequency, FrequencyAction::EmergencyStop);
        assert_eq!(d.fan_percent, 100);
        assert_eq!(c.current_frequency(), 0);
        assert_eq!(c.control_state(), ControlState::Cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn should_hold_inside_the_hysteresis_band() {
        let mut c = controller();

        for temp in [59.0, 60.0, 61.0, 61.9, 58.1] {
            advance(Duration::from_secs(30)).await;
            let d = c.on_sample(Some(temp));
            assert_eq!(d.frequency, FrequencyAction::Hold, "at {temp}");
        }
        assert_eq!(c.current_frequency(), 490);
    }

    #[tokio::test(start_paused = true)]
    async fn should_step_down_above_the_band_and_up_below_it() {
        let mut c = controller();

        let d = c.on_sample(Some(63.0));
        assert_eq!(d.frequency, FrequencyAction::Set(480));

        advance(Duration::from_secs(30)).await;
        let d = c.on_sample(Some(55.0));
        assert_eq!(d.frequency, FrequencyAction::Set(490));
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_step_up_while_still_heating() {
        let mut c = controller();

        // First cool sample bumps once.
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Set(500));
        advance(Duration::from_secs(30)).await;

        // 52 is below the band but the +2.0C trend says wait.
        let d = c.on_sample(Some(52.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);
        assert!(d.reason.contains("heating"));

        // Once the trend settles, the bump goes through.
        advance(Duration::from_secs(30)).await;
        let d = c.on_sample(Some(52.5));
        assert_eq!(d.frequency, FrequencyAction::Set(510));
    }

    #[tokio::test(start_paused = true)]
    async fn should_rate_limit_consecutive_adjustments() {
        let mut c = controller();

        let d = c.on_sample(Some(63.0));
        assert_eq!(d.frequency, FrequencyAction::Set(480));

        // 29s later: still inside the adjustment interval.
        advance(Duration::from_secs(29)).await;
        let d = c.on_sample(Some(66.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);

        // 30s after the adjustment: allowed again.
        advance(Duration::from_secs(1)).await;
        let d = c.on_sample(Some(66.0));
        assert_eq!(d.frequency, FrequencyAction::Set(460));
    }

    #[tokio::test(start_paused = true)]
    async fn should_trigger_emergency_regardless_of_rate_limit_and_auto_tune() {
        let mut c = controller();
        c.set_auto_tune(false);

        let d = c.on_sample(Some(64.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);
        assert!(d.reason.contains("auto-tune"));

        // Critical fires even with auto-tune off and no interval elapsed.
        let d = c.on_sample(Some(71.0));
        assert_eq!(d.frequency, FrequencyAction::EmergencyStop);
    }

    #[tokio::test(start_paused = true)]
    async fn should_hold_fleet_wide_when_global_auto_tune_is_off() {
        let mut c = controller();
        c.set_global_auto_tune(false);

        // 50C would normally step up; the kill switch holds everything.
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);
        assert!(d.reason.contains("fleet-wide"));

        // Re-enabling resumes tuning.
        c.set_global_auto_tune(true);
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Set(500));

        // Emergency protection is not subject to the switch.
        let mut c = controller();
        c.set_global_auto_tune(false);
        let d = c.on_sample(Some(71.0));
        assert_eq!(d.frequency, FrequencyAction::EmergencyStop);
    }

    #[tokio::test(start_paused = true)]
    async fn should_treat_emergency_as_idempotent_during_cooldown() {
        let mut c = controller();

        let d = c.on_sample(Some(72.0));
        assert_eq!(d.frequency, FrequencyAction::EmergencyStop);

        // Still hot a minute later: no second stop, just the cooldown hold.
        advance(Duration::from_secs(60)).await;
        let d = c.on_sample(Some(71.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);
        assert_eq!(d.state, ControlState::Cooldown);
        assert_eq!(d.fan_percent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn should_resume_at_default_exactly_when_cooldown_expires() {
        let mut c = controller();
        c.on_sample(Some(72.0));

        // One second short of the cooldown: still held.
        advance(Duration::from_secs(599)).await;
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);

        // At the boundary: restored to the profile default.
        advance(Duration::from_secs(1)).await;
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Set(490));
        assert_eq!(d.state, ControlState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn should_restart_cooldown_when_still_critical_at_expiry() {
        let mut c = controller();
        c.on_sample(Some(72.0));

        advance(Duration::from_secs(600)).await;
        let d = c.on_sample(Some(71.0));
        assert_eq!(d.frequency, FrequencyAction::EmergencyStop);
        assert_eq!(c.control_state(), ControlState::Cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn should_clamp_targets_to_the_profile_envelope() {
        let mut c = controller();

        // Walk up to the ceiling; further cool samples hold there.
        for _ in 0..20 {
            advance(Duration::from_secs(30)).await;
            c.on_sample(Some(50.0));
        }
        assert_eq!(c.current_frequency(), 600);

        advance(Duration::from_secs(30)).await;
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);

        // Warning samples stop at the floor.
        let mut c = controller();
        for _ in 0..20 {
            advance(Duration::from_secs(30)).await;
            c.on_sample(Some(66.0));
        }
        assert_eq!(c.current_frequency(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_missing_and_non_finite_readings() {
        let mut c = controller();
        c.on_sample(Some(60.0));

        let d = c.on_sample(None);
        assert_eq!(d.frequency, FrequencyAction::Hold);

        let d = c.on_sample(Some(f32::NAN));
        assert_eq!(d.frequency, FrequencyAction::Hold);
        assert_eq!(c.current_frequency(), 490);
    }

    #[tokio::test(start_paused = true)]
    async fn should_clamp_absurd_readings_instead_of_erroring() {
        let mut c = controller();

        // A glitched 300C reading clamps to the ceiling, which is still
        // critical, so the safe path fires rather than a panic.
        let d = c.on_sample(Some(300.0));
        assert_eq!(d.frequency, FrequencyAction::EmergencyStop);
    }

    #[tokio::test(start_paused = true)]
    async fn should_zone_the_fan_curve_by_temperature() {
        let mut c = controller();

        assert_eq!(c.on_sample(Some(55.0)).fan_percent, FAN_SPEED_QUIET);
        advance(Duration::from_secs(30)).await;
        assert_eq!(c.on_sample(Some(63.0)).fan_percent, FAN_SPEED_ELEVATED);
        advance(Duration::from_secs(30)).await;
        assert_eq!(c.on_sample(Some(66.0)).fan_percent, FAN_SPEED_WARNING);
        advance(Duration::from_secs(30)).await;
        assert_eq!(c.on_sample(Some(71.0)).fan_percent, FAN_SPEED_MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn should_force_frequency_clamped_and_disable_auto_tune() {
        let mut c = controller();

        let adopted = c.force_frequency(900);
        assert_eq!(adopted, 600);
        assert!(!c.auto_tune_enabled());

        // Subsequent cool samples no longer tune.
        advance(Duration::from_secs(60)).await;
        let d = c.on_sample(Some(50.0));
        assert_eq!(d.frequency, FrequencyAction::Hold);

        c.reset();
        assert_eq!(c.current_frequency(), 490);
        assert!(c.auto_tune_enabled());
    }
}

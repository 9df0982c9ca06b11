//! Mining schedule resolution.
//!
//! Schedule rows are windows carrying a [`ScheduleDirective`] instead of
//! a raw frequency, so "no row covers this hour", "run uncapped", and
//! "stop mining" are three distinct answers rather than overloaded
//! sentinel values.

use time::{OffsetDateTime, Time, Weekday};

use super::window::{self, RateWindow};
use crate::error::{Error, Result};

/// What the schedule asks of the fleet during a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDirective {
    /// Mine with no frequency cap; the thermal controller governs.
    Unlimited,
    /// Do not mine during this window.
    Shutdown,
    /// Mine, capped at this many MHz.
    Target(u16),
}

impl ScheduleDirective {
    pub fn should_mine(&self) -> bool {
        !matches!(self, ScheduleDirective::Shutdown)
    }

    /// Map a stored row frequency to a directive: zero historically
    /// meant "do not mine".
    pub fn from_row_frequency(mhz: u16) -> ScheduleDirective {
        if mhz == 0 {
            ScheduleDirective::Shutdown
        } else {
            ScheduleDirective::Target(mhz)
        }
    }
}

/// Resolves the active schedule directive for any instant.
#[derive(Debug, Clone, Default)]
pub struct ScheduleEngine {
    rows: Vec<RateWindow<ScheduleDirective>>,
}

impl ScheduleEngine {
    pub fn new(rows: Vec<RateWindow<ScheduleDirective>>) -> Self {
        Self { rows }
    }

    /// Derive a schedule from rate windows: expensive hours get the low
    /// frequency, cheap hours the high one. A low frequency of zero
    /// shuts mining down during expensive hours; a high frequency of
    /// zero leaves cheap hours uncapped.
    pub fn from_rates(
        rates: &[RateWindow<f64>],
        max_rate_threshold: f64,
        low_mhz: u16,
        high_mhz: u16,
    ) -> Result<Self> {
        if max_rate_threshold < 0.0 {
            return Err(Error::Config(format!(
                "negative rate threshold {max_rate_threshold}"
            )));
        }

        let rows = rates
            .iter()
            .map(|rate| {
                let directive = if rate.value > max_rate_threshold {
                    ScheduleDirective::from_row_frequency(low_mhz)
                } else if high_mhz == 0 {
                    ScheduleDirective::Unlimited
                } else {
                    ScheduleDirective::Target(high_mhz)
                };
                RateWindow::new(
                    rate.day,
                    rate.start,
                    rate.end,
                    directive,
                    rate.label.clone(),
                )
            })
            .collect();

        Ok(Self { rows })
    }

    /// The directive in force at the given local day and time. `None`
    /// means no row covers the instant, which is distinct from an
    /// explicit [`ScheduleDirective::Unlimited`] row.
    pub fn directive_at(&self, day: Weekday, t: Time) -> Option<ScheduleDirective> {
        window::resolve(day, t, &self.rows).map(|w| w.value)
    }

    /// Whether the fleet should be mining right now, and under what
    /// directive. With no covering row, mining proceeds unconstrained.
    pub fn should_mine_now(&self, now: OffsetDateTime) -> (bool, Option<ScheduleDirective>) {
        let directive = self.directive_at(now.weekday(), now.time());
        (directive.is_none_or(|d| d.should_mine()), directive)
    }

    /// Directive for each hour of the given day, sampled at the top of
    /// the hour. Used for cost and hashrate projections.
    pub fn hourly_plan(&self, day: Weekday) -> [Option<ScheduleDirective>; 24] {
        std::array::from_fn(|hour| {
            // Hour index is always a valid time.
            let t = Time::from_hms(hour as u8, 0, 0).unwrap();
            self.directive_at(day, t)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

//! Fleet configuration from environment variables.
//!
//! Every knob has a default suited to a home fleet on one /24; overrides
//! come from `AXEFLEET_*` environment variables. Unparseable values fall
//! back to the default with a warning rather than aborting startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::tracing::prelude::*;

/// Runtime configuration for the fleet manager.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// CIDR subnet scanned during discovery (`AXEFLEET_SUBNET`).
    pub subnet: String,
    /// Control tick cadence (`AXEFLEET_TICK_SECS`).
    pub tick_interval: Duration,
    /// Per-device status poll timeout (`AXEFLEET_POLL_TIMEOUT_SECS`).
    pub poll_timeout: Duration,
    /// Hard deadline for one whole tick; stragglers past it are treated
    /// as offline (`AXEFLEET_TICK_DEADLINE_SECS`).
    pub tick_deadline: Duration,
    /// Concurrent poll workers per tick (`AXEFLEET_POLL_WORKERS`).
    pub poll_workers: usize,
    /// Concurrent probes during discovery (`AXEFLEET_DISCOVERY_WORKERS`).
    pub discovery_workers: usize,
    /// Per-address probe timeout during discovery
    /// (`AXEFLEET_DISCOVERY_TIMEOUT_SECS`).
    pub discovery_timeout: Duration,
    /// Post-emergency cooldown before frequency control resumes
    /// (`AXEFLEET_COOLDOWN_SECS`).
    pub cooldown_duration: Duration,
    /// Minimum spacing between frequency adjustments
    /// (`AXEFLEET_ADJUSTMENT_SECS`).
    pub adjustment_interval: Duration,
    /// Alert dedup window (`AXEFLEET_ALERT_COOLDOWN_SECS`).
    pub alert_cooldown: Duration,
    /// Temperature at or below which an overheated device may be
    /// rebooted (`AXEFLEET_RECOVERY_TEMP_C`).
    pub overheat_recovery_temp_c: f32,
    /// Reboot overheated devices automatically once they cool off
    /// (`AXEFLEET_AUTO_REBOOT`, "0" to disable).
    pub auto_reboot_on_recovery: bool,
    /// Webhook endpoints for alert delivery, comma separated
    /// (`AXEFLEET_WEBHOOK_URLS`).
    pub webhook_urls: Vec<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            subnet: "10.0.0.0/24".to_string(),
            tick_interval: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(3),
            tick_deadline: Duration::from_secs(12),
            poll_workers: 16,
            discovery_workers: 20,
            discovery_timeout: Duration::from_secs(2),
            cooldown_duration: Duration::from_secs(600),
            adjustment_interval: Duration::from_secs(30),
            alert_cooldown: Duration::from_secs(900),
            overheat_recovery_temp_c: 60.0,
            auto_reboot_on_recovery: true,
            webhook_urls: Vec::new(),
        }
    }
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            subnet: env::var("AXEFLEET_SUBNET").unwrap_or(defaults.subnet),
            tick_interval: env_secs("AXEFLEET_TICK_SECS", defaults.tick_interval),
            poll_timeout: env_secs("AXEFLEET_POLL_TIMEOUT_SECS", defaults.poll_timeout),
            tick_deadline: env_secs("AXEFLEET_TICK_DEADLINE_SECS", defaults.tick_deadline),
            poll_workers: env_parse("AXEFLEET_POLL_WORKERS", defaults.poll_workers),
            discovery_workers: env_parse("AXEFLEET_DISCOVERY_WORKERS", defaults.discovery_workers),
            discovery_timeout: env_secs(
                "AXEFLEET_DISCOVERY_TIMEOUT_SECS",
                defaults.discovery_timeout,
            ),
            cooldown_duration: env_secs("AXEFLEET_COOLDOWN_SECS", defaults.cooldown_duration),
            adjustment_interval: env_secs("AXEFLEET_ADJUSTMENT_SECS", defaults.adjustment_interval),
            alert_cooldown: env_secs("AXEFLEET_ALERT_COOLDOWN_SECS", defaults.alert_cooldown),
            overheat_recovery_temp_c: env_parse(
                "AXEFLEET_RECOVERY_TEMP_C",
                defaults.overheat_recovery_temp_c,
            ),
            auto_reboot_on_recovery: env::var("AXEFLEET_AUTO_REBOOT")
                .map(|v| v != "0")
                .unwrap_or(defaults.auto_reboot_on_recovery),
            webhook_urls: env::var("AXEFLEET_WEBHOOK_URLS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.webhook_urls),
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Unparseable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

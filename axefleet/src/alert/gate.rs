//! Alert deduplication.
//!
//! Repeats of the same event for the same device are suppressed inside a
//! cooldown window so a flapping miner produces one page, not sixty.
//! Keys are `(alert type, device-or-global)`, so different event types
//! for one device, and the same event type on different devices, never
//! suppress each other.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::event::{Alert, AlertType};

pub struct AlertGate {
    cooldown: Duration,
    last_sent: HashMap<(AlertType, String), Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    /// Whether this alert may go out now. A key becomes eligible again
    /// exactly when the cooldown has elapsed.
    pub fn should_send(&self, alert: &Alert) -> bool {
        match self.last_sent.get(&Self::key(alert)) {
            Some(last) => last.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Record a delivery, restarting the key's cooldown.
    pub fn record_sent(&mut self, alert: &Alert) {
        self.last_sent.insert(Self::key(alert), Instant::now());
    }

    fn key(alert: &Alert) -> (AlertType, String) {
        let scope = alert.device.clone().unwrap_or_else(|| "global".to_string());
        (alert.alert_type, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const COOLDOWN: Duration = Duration::from_secs(900);

    fn gate() -> AlertGate {
        AlertGate::new(COOLDOWN)
    }

    #[tokio::test(start_paused = true)]
    async fn should_suppress_repeats_inside_the_cooldown() {
        let mut gate = gate();
        let alert = Alert::miner_offline("10.0.0.7");

        assert!(gate.should_send(&alert));
        gate.record_sent(&alert);

        assert!(!gate.should_send(&alert));
        advance(Duration::from_secs(600)).await;
        assert!(!gate.should_send(&alert));
    }

    #[tokio::test(start_paused = true)]
    async fn should_become_eligible_exactly_at_cooldown_expiry() {
        let mut gate = gate();
        let alert = Alert::miner_offline("10.0.0.7");
        gate.record_sent(&alert);

        advance(COOLDOWN - Duration::from_secs(1)).await;
        assert!(!gate.should_send(&alert));

        advance(Duration::from_secs(1)).await;
        assert!(gate.should_send(&alert));
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_event_types_independent() {
        let mut gate = gate();
        gate.record_sent(&Alert::miner_offline("10.0.0.7"));

        assert!(gate.should_send(&Alert::high_temperature("10.0.0.7", 66.0)));
        assert!(gate.should_send(&Alert::miner_online("10.0.0.7")));
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_devices_independent() {
        let mut gate = gate();
        gate.record_sent(&Alert::miner_offline("10.0.0.7"));

        assert!(gate.should_send(&Alert::miner_offline("10.0.0.8")));
        assert!(gate.should_send(&Alert::unprofitable("rates spiked")));
    }

    #[tokio::test(start_paused = true)]
    async fn should_scope_fleet_wide_alerts_to_a_global_key() {
        let mut gate = gate();
        gate.record_sent(&Alert::unprofitable("rates spiked"));

        assert!(!gate.should_send(&Alert::unprofitable("rates spiked again")));
    }
}

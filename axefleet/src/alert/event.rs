//! Alert event vocabulary.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MinerOffline,
    MinerOnline,
    HighTemperature,
    CriticalTemperature,
    EmergencyShutdown,
    OverheatRecovery,
    FrequencyAdjusted,
    Unprofitable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

/// One alert event. `device` is the miner's address, or `None` for
/// fleet-wide events; it doubles as the dedup key in the gate.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub device: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            device: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn for_device(mut self, addr: impl Into<String>) -> Self {
        self.device = Some(addr.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn miner_offline(addr: &str) -> Self {
        Self::new(
            AlertType::MinerOffline,
            Severity::Warning,
            "Miner offline",
            format!("Miner {addr} stopped responding"),
        )
        .for_device(addr)
    }

    pub fn miner_online(addr: &str) -> Self {
        Self::new(
            AlertType::MinerOnline,
            Severity::Info,
            "Miner online",
            format!("Miner {addr} is responding again"),
        )
        .for_device(addr)
    }

    pub fn high_temperature(addr: &str, temp_c: f32) -> Self {
        Self::new(
            AlertType::HighTemperature,
            Severity::Warning,
            "High temperature",
            format!("Miner {addr} running hot at {temp_c:.1}C"),
        )
        .for_device(addr)
        .with_field("temp_c", format!("{temp_c:.1}"))
    }

    pub fn critical_temperature(addr: &str, temp_c: f32) -> Self {
        Self::new(
            AlertType::CriticalTemperature,
            Severity::Critical,
            "Critical temperature",
            format!("Miner {addr} at {temp_c:.1}C"),
        )
        .for_device(addr)
        .with_field("temp_c", format!("{temp_c:.1}"))
    }

    pub fn emergency_shutdown(addr: &str, temp_c: f32) -> Self {
        Self::new(
            AlertType::EmergencyShutdown,
            Severity::Emergency,
            "Emergency shutdown",
            format!("Miner {addr} shut down at {temp_c:.1}C"),
        )
        .for_device(addr)
        .with_field("temp_c", format!("{temp_c:.1}"))
    }

    pub fn overheat_recovery(addr: &str, temp_c: f32) -> Self {
        Self::new(
            AlertType::OverheatRecovery,
            Severity::Info,
            "Overheat recovery",
            format!("Miner {addr} cooled to {temp_c:.1}C, rebooting"),
        )
        .for_device(addr)
        .with_field("temp_c", format!("{temp_c:.1}"))
    }

    pub fn frequency_adjusted(addr: &str, to_mhz: u16, reason: &str) -> Self {
        Self::new(
            AlertType::FrequencyAdjusted,
            Severity::Warning,
            "Frequency adjusted",
            format!("Miner {addr} moved to {to_mhz} MHz: {reason}"),
        )
        .for_device(addr)
        .with_field("freq_mhz", to_mhz.to_string())
    }

    pub fn unprofitable(message: impl Into<String>) -> Self {
        Self::new(
            AlertType::Unprofitable,
            Severity::Warning,
            "Mining unprofitable",
            message,
        )
    }
}

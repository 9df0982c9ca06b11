//! Device abstraction and protocol adapter registry.
//!
//! Each protocol adapter implements [`DeviceClient`] and registers a
//! [`ClientDescriptor`] via `inventory::submit!`. Detection walks the
//! descriptors in priority order and keeps the first client whose probe
//! answers, refining the family from the reported model where the
//! protocol serves several vendors.

pub mod cgminer;
pub mod esp_miner;
pub mod sim;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::Result;
use crate::tracing::prelude::*;

/// Hardware family, determining protocol and control capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    Bitaxe,
    Antminer,
    Whatsminer,
    Avalon,
    Unknown,
}

impl DeviceFamily {
    /// ESP-Miner firmware accepts live frequency changes over HTTP; the
    /// CGMiner API is read-only for settings.
    pub fn supports_frequency_control(&self) -> bool {
        matches!(self, DeviceFamily::Bitaxe)
    }

    pub fn supports_fan_control(&self) -> bool {
        matches!(self, DeviceFamily::Bitaxe)
    }
}

/// Map a firmware-reported model string onto a family.
pub fn family_from_model(model: &str) -> Option<DeviceFamily> {
    let model = model.to_ascii_lowercase();
    if model.contains("antminer") {
        Some(DeviceFamily::Antminer)
    } else if model.contains("whatsminer") {
        Some(DeviceFamily::Whatsminer)
    } else if model.contains("avalon") {
        Some(DeviceFamily::Avalon)
    } else if model.contains("bitaxe") || model.contains("nerd") || model.contains("bm1") {
        Some(DeviceFamily::Bitaxe)
    } else {
        None
    }
}

/// One poll result, normalized across protocols.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub hashrate_hs: f64,
    pub temperature_c: Option<f32>,
    pub power_w: f64,
    pub fan_percent: Option<u8>,
    pub frequency_mhz: Option<u16>,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    /// Best share difficulty as reported, e.g. "8.52G".
    pub best_difficulty: Option<String>,
    /// Firmware-level overheat protection has tripped.
    pub overheat_mode: bool,
    pub model: Option<String>,
}

/// Health classification derived from a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceHealth {
    Online,
    /// Responding, but temperature is in the warning band.
    Overheating,
    /// Firmware overheat protection tripped; mining halted until the
    /// device cools and reboots.
    Overheated,
    Offline,
}

/// Settings applied to a device. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceSettings {
    pub frequency_mhz: Option<u16>,
    pub fan_percent: Option<u8>,
    /// Switch firmware fan management off when taking manual control.
    pub auto_fan: Option<bool>,
}

impl DeviceSettings {
    pub fn frequency(mhz: u16) -> Self {
        Self {
            frequency_mhz: Some(mhz),
            ..Self::default()
        }
    }

    pub fn fan(percent: u8) -> Self {
        Self {
            fan_percent: Some(percent),
            auto_fan: Some(false),
            ..Self::default()
        }
    }
}

/// Protocol adapter for one miner family.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Cheap liveness-and-identity check used during discovery.
    async fn probe(&self, addr: &str) -> Result<bool>;

    async fn get_status(&self, addr: &str) -> Result<TelemetrySnapshot>;

    async fn apply_settings(&self, addr: &str, settings: DeviceSettings) -> Result<()>;

    async fn restart(&self, addr: &str) -> Result<()>;
}

/// One registry record for a managed device.
#[derive(Debug, Clone)]
pub struct Device {
    pub addr: String,
    pub family: DeviceFamily,
    pub custom_name: Option<String>,
    pub is_simulated: bool,
    pub health: DeviceHealth,
    pub last_snapshot: Option<TelemetrySnapshot>,
    pub last_seen: Option<Instant>,
}

impl Device {
    pub fn new(addr: impl Into<String>, family: DeviceFamily) -> Self {
        Self {
            addr: addr.into(),
            family,
            custom_name: None,
            is_simulated: false,
            health: DeviceHealth::Offline,
            last_snapshot: None,
            last_seen: None,
        }
    }

    /// Custom name if set, otherwise the address.
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.addr)
    }
}

/// Factory signature for building a client with a given request timeout.
pub type ClientFactoryFn = fn(Duration) -> Arc<dyn DeviceClient>;

/// Adapter registration collected by inventory.
///
/// ## Probe ordering
///
/// Descriptors are probed in ascending `priority`. The cheap HTTP probe
/// goes first: a CGMiner TCP probe against an ESP-Miner device would
/// wait out its full timeout.
pub struct ClientDescriptor {
    /// Family assumed when the model string doesn't refine it.
    pub family: DeviceFamily,
    /// Human-readable adapter name (e.g., "esp-miner").
    pub name: &'static str,
    pub priority: u8,
    pub create_fn: ClientFactoryFn,
}

inventory::collect!(ClientDescriptor);

/// Registry over all compiled-in protocol adapters.
pub struct ClientRegistry;

impl ClientRegistry {
    /// All descriptors, cheapest probe first.
    pub fn descriptors() -> Vec<&'static ClientDescriptor> {
        let mut all: Vec<_> = inventory::iter::<ClientDescriptor>().collect();
        all.sort_by_key(|d| d.priority);
        all
    }

    /// Probe an address with each adapter in turn. Returns the detected
    /// family and a ready client, or `None` when nothing answers.
    pub async fn detect(
        addr: &str,
        timeout: Duration,
    ) -> Option<(DeviceFamily, Arc<dyn DeviceClient>)> {
        for descriptor in Self::descriptors() {
            let client = (descriptor.create_fn)(timeout);
            match client.probe(addr).await {
                Ok(true) => {
                    let family = match client.get_status(addr).await {
                        Ok(snapshot) => snapshot
                            .model
                            .as_deref()
                            .and_then(family_from_model)
                            .unwrap_or(descriptor.family),
                        Err(_) => descriptor.family,
                    };
                    debug!(addr, adapter = descriptor.name, %family, "Device detected");
                    return Some((family, client));
                }
                Ok(false) => {}
                Err(e) => {
                    trace!(addr, adapter = descriptor.name, error = %e, "Probe failed");
                }
            }
        }
        None
    }
}

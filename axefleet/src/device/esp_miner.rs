//! ESP-Miner HTTP adapter (Bitaxe and derivatives).
//!
//! Talks to the AxeOS web API: `GET /api/system/info` for telemetry,
//! `PATCH /api/system` for settings, `POST /api/system/restart`.
//! Hashrate is reported in GH/s and normalized to H/s here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ClientDescriptor, DeviceClient, DeviceFamily, DeviceSettings, TelemetrySnapshot};
use crate::error::{Error, Result};

pub struct EspMinerClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl EspMinerClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    fn url(addr: &str, path: &str) -> String {
        format!("http://{addr}{path}")
    }

    async fn system_info(&self, addr: &str) -> Result<SystemInfo> {
        let response = self
            .http
            .get(Self::url(addr, "/api/system/info"))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(response.json().await?)
    }
}

/// Subset of the AxeOS system info payload the fleet manager uses.
/// Unknown fields are ignored; missing fields default so firmware
/// variants stay compatible.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SystemInfo {
    #[serde(rename = "hashRate")]
    hash_rate_ghs: f64,
    temp: f64,
    power: f64,
    fanspeed: f64,
    frequency: f64,
    #[serde(rename = "sharesAccepted")]
    shares_accepted: u64,
    #[serde(rename = "sharesRejected")]
    shares_rejected: u64,
    #[serde(rename = "bestDiff")]
    best_diff: Option<String>,
    #[serde(rename = "overheat_mode")]
    overheat_mode: u8,
    #[serde(rename = "ASICModel")]
    asic_model: Option<String>,
    #[serde(rename = "boardVersion")]
    board_version: Option<String>,
}

impl SystemInfo {
    fn model(&self) -> Option<String> {
        // Prefer the board identity; fall back to the bare ASIC model.
        match (&self.board_version, &self.asic_model) {
            (Some(board), _) if board.to_ascii_lowercase().contains("nerd") => {
                Some(board.clone())
            }
            (_, Some(asic)) => Some(asic.clone()),
            (Some(board), None) => Some(board.clone()),
            (None, None) => None,
        }
    }
}

impl From<SystemInfo> for TelemetrySnapshot {
    fn from(info: SystemInfo) -> Self {
        let model = info.model();
        TelemetrySnapshot {
            hashrate_hs: info.hash_rate_ghs * 1e9,
            temperature_c: Some(info.temp as f32),
            power_w: info.power,
            fan_percent: Some(info.fanspeed.clamp(0.0, 100.0) as u8),
            frequency_mhz: Some(info.frequency as u16),
            shares_accepted: info.shares_accepted,
            shares_rejected: info.shares_rejected,
            best_difficulty: info.best_diff,
            overheat_mode: info.overheat_mode != 0,
            model,
        }
    }
}

#[async_trait]
impl DeviceClient for EspMinerClient {
    async fn probe(&self, addr: &str) -> Result<bool> {
        match self.system_info(addr).await {
            Ok(info) => Ok(info.asic_model.is_some() || info.power > 0.0),
            Err(_) => Ok(false),
        }
    }

    async fn get_status(&self, addr: &str) -> Result<TelemetrySnapshot> {
        Ok(self.system_info(addr).await?.into())
    }

    async fn apply_settings(&self, addr: &str, settings: DeviceSettings) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(mhz) = settings.frequency_mhz {
            body.insert("frequency".into(), mhz.into());
        }
        if let Some(percent) = settings.fan_percent {
            body.insert("fanspeed".into(), percent.into());
        }
        if let Some(auto) = settings.auto_fan {
            body.insert("autofanspeed".into(), u8::from(auto).into());
        }
        if body.is_empty() {
            return Ok(());
        }

        self.http
            .patch(Self::url(addr, "/api/system"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(())
    }

    async fn restart(&self, addr: &str) -> Result<()> {
        self.http
            .post(Self::url(addr, "/api/system/restart"))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(())
    }
}

inventory::submit! {
    ClientDescriptor {
        family: DeviceFamily::Bitaxe,
        name: "esp-miner",
        priority: 0,
        create_fn: |timeout| Arc::new(EspMinerClient::new(timeout)),
    }
}

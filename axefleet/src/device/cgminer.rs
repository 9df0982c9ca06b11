//! CGMiner TCP API adapter (Antminer, Whatsminer, Avalon).
//!
//! One JSON command per connection on port 4028. The API is read-only
//! for settings on stock firmware, so this adapter only reports
//! telemetry and issues restarts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{ClientDescriptor, DeviceClient, DeviceFamily, DeviceSettings, TelemetrySnapshot};
use crate::error::{Error, Result};

pub const CGMINER_PORT: u16 = 4028;

pub struct CgMinerClient {
    timeout: Duration,
}

impl CgMinerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn send_command(&self, addr: &str, command: &str) -> Result<Value> {
        let exchange = async {
            let mut stream = TcpStream::connect((addr, CGMINER_PORT)).await?;
            let request = json!({ "command": command }).to_string();
            stream.write_all(request.as_bytes()).await?;
            stream.shutdown().await?;

            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).await?;
            Ok::<_, Error>(raw)
        };

        let raw = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Transient(format!("cgminer {command} timed out for {addr}")))??;

        parse_response(&raw)
    }
}

/// CGMiner responses often carry a trailing NUL byte.
fn parse_response(raw: &[u8]) -> Result<Value> {
    let trimmed = raw.strip_suffix(b"\0").unwrap_or(raw);
    serde_json::from_slice(trimmed)
        .map_err(|e| Error::Protocol(format!("bad cgminer response: {e}")))
}

fn first_record<'a>(response: &'a Value, section: &str) -> Option<&'a Value> {
    response.get(section)?.get(0)
}

fn f64_field(record: Option<&Value>, field: &str) -> f64 {
    record
        .and_then(|r| r.get(field))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

#[async_trait]
impl DeviceClient for CgMinerClient {
    async fn probe(&self, addr: &str) -> Result<bool> {
        match self.send_command(addr, "version").await {
            Ok(response) => Ok(first_record(&response, "VERSION").is_some()),
            Err(_) => Ok(false),
        }
    }

    async fn get_status(&self, addr: &str) -> Result<TelemetrySnapshot> {
        let summary = self.send_command(addr, "summary").await?;
        let devs = self.send_command(addr, "devs").await?;
        let version = self.send_command(addr, "version").await.ok();

        let summary = first_record(&summary, "SUMMARY");
        let dev = first_record(&devs, "DEVS");
        let model = version
            .as_ref()
            .and_then(|v| first_record(v, "VERSION"))
            .and_then(|r| {
                r.get("Type")
                    .or_else(|| r.get("Description"))
                    .and_then(Value::as_str)
            })
            .map(String::from);

        let temperature = f64_field(dev, "Temperature");
        Ok(TelemetrySnapshot {
            // "MHS av" is megahashes per second.
            hashrate_hs: f64_field(summary, "MHS av") * 1e6,
            temperature_c: (temperature > 0.0).then_some(temperature as f32),
            power_w: f64_field(summary, "Power"),
            fan_percent: None,
            frequency_mhz: {
                let frequency = f64_field(dev, "Frequency");
                (frequency > 0.0).then_some(frequency as u16)
            },
            shares_accepted: f64_field(summary, "Accepted") as u64,
            shares_rejected: f64_field(summary, "Rejected") as u64,
            best_difficulty: summary
                .and_then(|r| r.get("Best Share"))
                .and_then(Value::as_f64)
                .map(|best| best.to_string()),
            overheat_mode: false,
            model,
        })
    }

    async fn apply_settings(&self, addr: &str, _settings: DeviceSettings) -> Result<()> {
        Err(Error::Protocol(format!(
            "cgminer API is read-only, cannot apply settings to {addr}"
        )))
    }

    async fn restart(&self, addr: &str) -> Result<()> {
        self.send_command(addr, "restart").await.map(|_| ())
    }
}

inventory::submit! {
    ClientDescriptor {
        family: DeviceFamily::Unknown,
        name: "cgminer",
        priority: 1,
        create_fn: |timeout| Arc::new(CgMinerClient::new(timeout)),
    }
}

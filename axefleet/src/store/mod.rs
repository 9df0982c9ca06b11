//! Abstract persistence behind the orchestrator.
//!
//! The control loop never talks to a concrete database; it reads and
//! writes through [`FleetStore`]. [`MemoryStore`] is the in-tree
//! implementation; durable backends plug in behind the same trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::device::{DeviceFamily, DeviceHealth};
use crate::error::Result;
use crate::rates::schedule::ScheduleDirective;
use crate::rates::window::RateWindow;
use crate::types::difficulty;

/// Durable identity and preferences for one device.
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub addr: String,
    pub family: DeviceFamily,
    pub custom_name: Option<String>,
    pub auto_tune_enabled: bool,
}

/// One persisted telemetry sample.
#[derive(Debug, Clone)]
pub struct StatsSample {
    pub addr: String,
    pub at: OffsetDateTime,
    pub health: DeviceHealth,
    pub hashrate_hs: f64,
    pub temperature_c: Option<f32>,
    pub power_w: f64,
    pub fan_percent: Option<u8>,
    pub frequency_mhz: Option<u16>,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub best_difficulty: Option<String>,
}

#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn devices(&self) -> Result<Vec<DeviceRow>>;

    async fn upsert_device(&self, row: DeviceRow) -> Result<()>;

    async fn remove_device(&self, addr: &str) -> Result<()>;

    async fn add_sample(&self, sample: StatsSample) -> Result<()>;

    async fn rate_windows(&self) -> Result<Vec<RateWindow<f64>>>;

    async fn replace_rate_windows(&self, windows: Vec<RateWindow<f64>>) -> Result<()>;

    async fn schedule_rows(&self) -> Result<Vec<RateWindow<ScheduleDirective>>>;

    async fn replace_schedule_rows(&self, rows: Vec<RateWindow<ScheduleDirective>>) -> Result<()>;

    /// Highest difficulty ever observed across the fleet's history.
    async fn best_difficulty_ever(&self) -> Result<f64>;
}

#[derive(Default)]
struct MemoryInner {
    devices: Vec<DeviceRow>,
    samples: Vec<StatsSample>,
    rate_windows: Vec<RateWindow<f64>>,
    schedule_rows: Vec<RateWindow<ScheduleDirective>>,
    best_difficulty: f64,
}

/// Volatile store for tests and rehearsal runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> usize {
        self.inner.lock().samples.len()
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn devices(&self) -> Result<Vec<DeviceRow>> {
        Ok(self.inner.lock().devices.clone())
    }

    async fn upsert_device(&self, row: DeviceRow) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.devices.iter_mut().find(|d| d.addr == row.addr) {
            Some(existing) => *existing = row,
            None => inner.devices.push(row),
        }
        Ok(())
    }

    async fn remove_device(&self, addr: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.devices.retain(|d| d.addr != addr);
        Ok(())
    }

    async fn add_sample(&self, sample: StatsSample) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(best) = sample
            .best_difficulty
            .as_deref()
            .and_then(difficulty::parse_magnitude)
        {
            inner.best_difficulty = inner.best_difficulty.max(best);
        }
        inner.samples.push(sample);
        Ok(())
    }

    async fn rate_windows(&self) -> Result<Vec<RateWindow<f64>>> {
        Ok(self.inner.lock().rate_windows.clone())
    }

    async fn replace_rate_windows(&self, windows: Vec<RateWindow<f64>>) -> Result<()> {
        self.inner.lock().rate_windows = windows;
        Ok(())
    }

    async fn schedule_rows(&self) -> Result<Vec<RateWindow<ScheduleDirective>>> {
        Ok(self.inner.lock().schedule_rows.clone())
    }

    async fn replace_schedule_rows(&self, rows: Vec<RateWindow<ScheduleDirective>>) -> Result<()> {
        self.inner.lock().schedule_rows = rows;
        Ok(())
    }

    async fn best_difficulty_ever(&self) -> Result<f64> {
        Ok(self.inner.lock().best_difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(addr: &str, best: Option<&str>) -> StatsSample {
        StatsSample {
            addr: addr.to_string(),
            at: OffsetDateTime::now_utc(),
            health: DeviceHealth::Online,
            hashrate_hs: 500e9,
            temperature_c: Some(60.0),
            power_w: 13.0,
            fan_percent: Some(50),
            frequency_mhz: Some(490),
            shares_accepted: 10,
            shares_rejected: 0,
            best_difficulty: best.map(String::from),
        }
    }

    #[tokio::test]
    async fn should_upsert_devices_by_address() {
        let store = MemoryStore::new();
        store
            .upsert_device(DeviceRow {
                addr: "10.0.0.7".into(),
                family: DeviceFamily::Bitaxe,
                custom_name: None,
                auto_tune_enabled: true,
            })
            .await
            .unwrap();
        store
            .upsert_device(DeviceRow {
                addr: "10.0.0.7".into(),
                family: DeviceFamily::Bitaxe,
                custom_name: Some("garage".into()),
                auto_tune_enabled: false,
            })
            .await
            .unwrap();

        let devices = store.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].custom_name.as_deref(), Some("garage"));
        assert!(!devices[0].auto_tune_enabled);

        store.remove_device("10.0.0.7").await.unwrap();
        assert!(store.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_track_the_best_difficulty_across_samples() {
        let store = MemoryStore::new();
        store.add_sample(sample("a", Some("189M"))).await.unwrap();
        store.add_sample(sample("b", Some("8.52G"))).await.unwrap();
        store.add_sample(sample("a", Some("2.1G"))).await.unwrap();
        store.add_sample(sample("a", None)).await.unwrap();
        store.add_sample(sample("a", Some("junk"))).await.unwrap();

        let best = store.best_difficulty_ever().await.unwrap();
        assert!((best - 8.52e9).abs() < 1e3);
        assert_eq!(store.sample_count(), 5);
    }
}

//! Aggregate fleet statistics.

use serde::Serialize;

use crate::device::{Device, DeviceHealth};
use crate::types::difficulty;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetStats {
    pub total_devices: usize,
    /// Responding devices (includes overheating ones still mining).
    pub online: usize,
    pub offline: usize,
    pub overheated: usize,
    pub total_hashrate_hs: f64,
    pub total_power_w: f64,
    /// Average over responding devices that reported a temperature.
    pub avg_temperature_c: Option<f32>,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    /// Best share difficulty ever seen, current fleet or history.
    pub best_difficulty: f64,
}

/// Fold every device into one stats record. The caller holds whatever
/// lock guards the devices; this does no I/O.
pub fn compute<'a>(
    devices: impl Iterator<Item = &'a Device>,
    historical_best_difficulty: f64,
) -> FleetStats {
    let mut stats = FleetStats {
        best_difficulty: historical_best_difficulty,
        ..FleetStats::default()
    };
    let mut temp_sum = 0.0f32;
    let mut temp_count = 0usize;

    for device in devices {
        stats.total_devices += 1;
        match device.health {
            DeviceHealth::Online | DeviceHealth::Overheating => stats.online += 1,
            DeviceHealth::Overheated => stats.overheated += 1,
            DeviceHealth::Offline => stats.offline += 1,
        }

        let responding = matches!(
            device.health,
            DeviceHealth::Online | DeviceHealth::Overheating
        );
        let Some(snapshot) = device.last_snapshot.as_ref().filter(|_| responding) else {
            continue;
        };

        stats.total_hashrate_hs += snapshot.hashrate_hs;
        stats.total_power_w += snapshot.power_w;
        stats.shares_accepted += snapshot.shares_accepted;
        stats.shares_rejected += snapshot.shares_rejected;
        if let Some(temp) = snapshot.temperature_c {
            temp_sum += temp;
            temp_count += 1;
        }
        if let Some(best) = snapshot
            .best_difficulty
            .as_deref()
            .and_then(difficulty::parse_magnitude)
        {
            stats.best_difficulty = stats.best_difficulty.max(best);
        }
    }

    if temp_count > 0 {
        stats.avg_temperature_c = Some(temp_sum / temp_count as f32);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceFamily, TelemetrySnapshot};

    fn device(addr: &str, health: DeviceHealth, snapshot: Option<TelemetrySnapshot>) -> Device {
        let mut d = Device::new(addr, DeviceFamily::Bitaxe);
        d.health = health;
        d.last_snapshot = snapshot;
        d
    }

    fn snapshot(hashrate_hs: f64, temp_c: f32, best: Option<&str>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            hashrate_hs,
            temperature_c: Some(temp_c),
            power_w: 13.0,
            shares_accepted: 100,
            shares_rejected: 2,
            best_difficulty: best.map(String::from),
            ..TelemetrySnapshot::default()
        }
    }

    #[test]
    fn should_aggregate_only_responding_devices() {
        let devices = vec![
            device(
                "a",
                DeviceHealth::Online,
                Some(snapshot(500e9, 58.0, Some("189M"))),
            ),
            device(
                "b",
                DeviceHealth::Overheating,
                Some(snapshot(450e9, 67.0, Some("8.52G"))),
            ),
            // Stale snapshot on an offline device must not count.
            device(
                "c",
                DeviceHealth::Offline,
                Some(snapshot(999e9, 40.0, Some("99G"))),
            ),
            device("d", DeviceHealth::Overheated, None),
        ];

        let stats = compute(devices.iter(), 0.0);

        assert_eq!(stats.total_devices, 4);
        assert_eq!(stats.online, 2);
        assert_eq!(stats.offline, 1);
        assert_eq!(stats.overheated, 1);
        assert!((stats.total_hashrate_hs - 950e9).abs() < 1.0);
        assert!((stats.total_power_w - 26.0).abs() < 1e-6);
        assert_eq!(stats.shares_accepted, 200);
        assert_eq!(stats.avg_temperature_c, Some(62.5));
        assert!((stats.best_difficulty - 8.52e9).abs() < 1e3);
    }

    #[test]
    fn should_keep_the_historical_best_when_it_dominates() {
        let devices = vec![device(
            "a",
            DeviceHealth::Online,
            Some(snapshot(500e9, 58.0, Some("189M"))),
        )];

        let stats = compute(devices.iter(), 12.0e9);
        assert!((stats.best_difficulty - 12.0e9).abs() < 1e3);
    }

    #[test]
    fn should_handle_an_empty_fleet() {
        let stats = compute(std::iter::empty(), 0.0);
        assert_eq!(stats.total_devices, 0);
        assert_eq!(stats.avg_temperature_c, None);
    }
}

//! Scripted device client.
//!
//! Stands in for real hardware in tests and hardware-free rehearsal: the
//! caller queues telemetry snapshots, and every settings application or
//! restart is recorded for inspection. With an empty queue the last
//! snapshot repeats; with no snapshot at all the device plays dead.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeviceClient, DeviceSettings, TelemetrySnapshot};
use crate::error::{Error, Result};

/// A call observed by the simulated device, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    ApplySettings(DeviceSettings),
    Restart,
}

#[derive(Default)]
struct SimState {
    queue: VecDeque<TelemetrySnapshot>,
    last: Option<TelemetrySnapshot>,
    calls: Vec<RecordedCall>,
    fail_next_status: bool,
}

#[derive(Default)]
pub struct SimulatedClient {
    state: Mutex<SimState>,
}

impl SimulatedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a snapshot to be returned by the next status poll.
    pub fn push_snapshot(&self, snapshot: TelemetrySnapshot) {
        self.state.lock().queue.push_back(snapshot);
    }

    /// Make the next status poll fail as unreachable.
    pub fn fail_next_status(&self) {
        self.state.lock().fail_next_status = true;
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn restart_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RecordedCall::Restart))
            .count()
    }
}

#[async_trait]
impl DeviceClient for SimulatedClient {
    async fn probe(&self, _addr: &str) -> Result<bool> {
        Ok(true)
    }

    async fn get_status(&self, addr: &str) -> Result<TelemetrySnapshot> {
        let mut state = self.state.lock();
        if state.fail_next_status {
            state.fail_next_status = false;
            return Err(Error::Transient(format!("simulated outage at {addr}")));
        }
        if let Some(next) = state.queue.pop_front() {
            state.last = Some(next.clone());
            return Ok(next);
        }
        state
            .last
            .clone()
            .ok_or_else(|| Error::Transient(format!("no snapshot scripted for {addr}")))
    }

    async fn apply_settings(&self, _addr: &str, settings: DeviceSettings) -> Result<()> {
        self.state
            .lock()
            .calls
            .push(RecordedCall::ApplySettings(settings));
        Ok(())
    }

    async fn restart(&self, _addr: &str) -> Result<()> {
        self.state.lock().calls.push(RecordedCall::Restart);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_replay_queued_snapshots_then_repeat_the_last() {
        let sim = SimulatedClient::new();
        sim.push_snapshot(TelemetrySnapshot {
            temperature_c: Some(55.0),
            ..TelemetrySnapshot::default()
        });
        sim.push_snapshot(TelemetrySnapshot {
            temperature_c: Some(58.0),
            ..TelemetrySnapshot::default()
        });

        assert_eq!(
            sim.get_status("sim-0").await.unwrap().temperature_c,
            Some(55.0)
        );
        assert_eq!(
            sim.get_status("sim-0").await.unwrap().temperature_c,
            Some(58.0)
        );
        // Queue is drained; the last snapshot repeats.
        assert_eq!(
            sim.get_status("sim-0").await.unwrap().temperature_c,
            Some(58.0)
        );
    }

    #[tokio::test]
    async fn should_play_dead_without_a_script() {
        let sim = SimulatedClient::new();
        let err = sim.get_status("sim-0").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn should_record_calls_in_order() {
        let sim = SimulatedClient::new();
        sim.apply_settings("sim-0", DeviceSettings::fan(85))
            .await
            .unwrap();
        sim.apply_settings("sim-0", DeviceSettings::frequency(450))
            .await
            .unwrap();
        sim.restart("sim-0").await.unwrap();

        assert_eq!(
            sim.recorded_calls(),
            vec![
                RecordedCall::ApplySettings(DeviceSettings::fan(85)),
                RecordedCall::ApplySettings(DeviceSettings::frequency(450)),
                RecordedCall::Restart,
            ]
        );
        assert_eq!(sim.restart_count(), 1);
    }
}

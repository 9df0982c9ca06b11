//! In-memory registry of managed devices.
//!
//! The registry lock is never held across a network call: poll tasks
//! take a [`PollHandle`] (cloned Arcs) up front, talk to the device,
//! then write the outcome back under a short write lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::device::{Device, DeviceClient, DeviceHealth, TelemetrySnapshot};
use crate::thermal::ThermalController;

use super::stats::{self, FleetStats};

/// What a poll task needs to work on one device without the registry
/// lock.
#[derive(Clone)]
pub struct PollHandle {
    pub addr: String,
    pub family: crate::device::DeviceFamily,
    pub client: Arc<dyn DeviceClient>,
    pub controller: Arc<Mutex<ThermalController>>,
}

struct DeviceEntry {
    device: Device,
    client: Arc<dyn DeviceClient>,
    controller: Arc<Mutex<ThermalController>>,
    /// Whether the device answered its previous poll; drives the
    /// edge-triggered offline/online alerts.
    was_responding: bool,
}

/// Responsiveness edge detected while recording a poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
}

#[derive(Default)]
pub struct FleetRegistry {
    entries: RwLock<HashMap<String, DeviceEntry>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a device. A fresh entry starts unresponsive,
    /// so the first successful poll raises a came-online transition.
    pub fn insert(
        &self,
        device: Device,
        client: Arc<dyn DeviceClient>,
        controller: ThermalController,
    ) {
        let entry = DeviceEntry {
            client,
            controller: Arc::new(Mutex::new(controller)),
            was_responding: false,
            device,
        };
        self.entries.write().insert(entry.device.addr.clone(), entry);
    }

    pub fn remove(&self, addr: &str) -> bool {
        self.entries.write().remove(addr).is_some()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.entries.read().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every device record, for display surfaces.
    pub fn devices(&self) -> Vec<Device> {
        self.entries
            .read()
            .values()
            .map(|e| e.device.clone())
            .collect()
    }

    pub fn device(&self, addr: &str) -> Option<Device> {
        self.entries.read().get(addr).map(|e| e.device.clone())
    }

    /// Handles for a polling pass, cloned out so the lock drops before
    /// any network traffic.
    pub fn poll_handles(&self) -> Vec<PollHandle> {
        self.entries
            .read()
            .values()
            .map(|e| PollHandle {
                addr: e.device.addr.clone(),
                family: e.device.family,
                client: Arc::clone(&e.client),
                controller: Arc::clone(&e.controller),
            })
            .collect()
    }

    pub fn handle(&self, addr: &str) -> Option<PollHandle> {
        let entries = self.entries.read();
        let e = entries.get(addr)?;
        Some(PollHandle {
            addr: e.device.addr.clone(),
            family: e.device.family,
            client: Arc::clone(&e.client),
            controller: Arc::clone(&e.controller),
        })
    }

    /// Record a poll outcome and report any responsiveness edge.
    pub fn record_result(
        &self,
        addr: &str,
        health: DeviceHealth,
        snapshot: Option<TelemetrySnapshot>,
    ) -> Option<Transition> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(addr)?;

        let was_responding = entry.was_responding;
        entry.device.health = health;
        if let Some(snapshot) = snapshot {
            entry.device.last_snapshot = Some(snapshot);
            entry.device.last_seen = Some(Instant::now());
        }
        // Overheated devices still answer polls; a device that trips
        // firmware protection and then vanishes is an offline edge.
        entry.was_responding = health != DeviceHealth::Offline;

        match health {
            DeviceHealth::Online if !was_responding => Some(Transition::CameOnline),
            DeviceHealth::Offline if was_responding => Some(Transition::WentOffline),
            _ => None,
        }
    }

    pub fn record_offline(&self, addr: &str) -> Option<Transition> {
        self.record_result(addr, DeviceHealth::Offline, None)
    }

    /// Run a closure against a device's thermal controller. Management
    /// operations (force frequency, auto-tune toggles, resets) go
    /// through here.
    pub fn with_controller<R>(
        &self,
        addr: &str,
        f: impl FnOnce(&mut ThermalController) -> R,
    ) -> Option<R> {
        let controller = {
            let entries = self.entries.read();
            Arc::clone(&entries.get(addr)?.controller)
        };
        let mut guard = controller.lock();
        Some(f(&mut guard))
    }

    /// Aggregate fleet statistics in one pass under one read lock.
    pub fn stats(&self, historical_best_difficulty: f64) -> FleetStats {
        let entries = self.entries.read();
        stats::compute(
            entries.values().map(|e| &e.device),
            historical_best_difficulty,
        )
    }
}

//! Fleet orchestration: discovery and the periodic control tick.
//!
//! The orchestrator owns no device state of its own; everything lives in
//! the [`FleetRegistry`] and behind the [`FleetStore`]. Each tick it
//! resolves the schedule directive once, fans out per-device polls
//! through a bounded pool, and applies thermal and schedule decisions to
//! each device. Alerts are emitted onto a channel and never awaited for
//! delivery.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::alert::Alert;
use crate::config::FleetConfig;
use crate::device::{
    ClientRegistry, Device, DeviceClient, DeviceFamily, DeviceHealth, DeviceSettings,
    TelemetrySnapshot,
};
use crate::error::{Error, Result};
use crate::rates::schedule::{ScheduleDirective, ScheduleEngine};
use crate::store::{DeviceRow, FleetStore, StatsSample};
use crate::thermal::{ControlState, FrequencyAction, ThermalController, ThermalProfile};
use crate::tracing::prelude::*;

use super::registry::{FleetRegistry, PollHandle, Transition};
use super::stats::FleetStats;

/// Per-device bookkeeping while firmware overheat protection holds.
struct OverheatTracking {
    since: Instant,
    reboot_attempted: bool,
}

pub struct FleetOrchestrator {
    config: FleetConfig,
    registry: Arc<FleetRegistry>,
    store: Arc<dyn FleetStore>,
    alert_tx: mpsc::Sender<Alert>,
    overheated: Mutex<HashMap<String, OverheatTracking>>,
    global_auto_tune: AtomicBool,
}

impl FleetOrchestrator {
    pub fn new(
        config: FleetConfig,
        registry: Arc<FleetRegistry>,
        store: Arc<dyn FleetStore>,
        alert_tx: mpsc::Sender<Alert>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            alert_tx,
            overheated: Mutex::new(HashMap::new()),
            global_auto_tune: AtomicBool::new(true),
        }
    }

    /// Fleet-wide auto-tune kill switch. Applies to every managed device
    /// and to devices adopted afterwards; emergency protection still
    /// runs while it is off.
    pub fn set_global_auto_tune(&self, enabled: bool) {
        self.global_auto_tune.store(enabled, Ordering::Relaxed);
        for handle in self.registry.poll_handles() {
            handle.controller.lock().set_global_auto_tune(enabled);
        }
        info!(enabled, "Fleet auto-tune toggled");
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    /// Re-register devices known to the store, probing each address.
    /// Unreachable devices are kept, registered offline with the adapter
    /// their family implies, so they resume management when they return.
    pub async fn load_devices(&self) -> Result<usize> {
        let rows = self.store.devices().await?;
        let mut loaded = 0;
        for row in rows {
            if self.registry.contains(&row.addr) {
                continue;
            }
            let detected = ClientRegistry::detect(&row.addr, self.config.discovery_timeout).await;
            let (family, client) = match detected {
                Some((family, client)) => (family, client),
                None => {
                    warn!(addr = %row.addr, "Stored device unreachable, registering offline");
                    let Some(client) =
                        fallback_client(row.family, self.config.discovery_timeout)
                    else {
                        continue;
                    };
                    (row.family, client)
                }
            };
            self.adopt(
                &row.addr,
                family,
                client,
                row.custom_name.clone(),
                row.auto_tune_enabled,
                false,
            )
            .await;
            loaded += 1;
        }
        info!(loaded, "Loaded stored devices");
        Ok(loaded)
    }

    /// Scan the configured subnet for new miners.
    pub async fn discover(&self) -> Result<usize> {
        let addrs = expand_subnet(&self.config.subnet)?;
        info!(
            subnet = %self.config.subnet,
            hosts = addrs.len(),
            "Scanning for miners"
        );

        let timeout = self.config.discovery_timeout;
        let found: Vec<_> = stream::iter(addrs)
            .map(|addr| async move {
                ClientRegistry::detect(&addr, timeout)
                    .await
                    .map(|(family, client)| (addr, family, client))
            })
            .buffer_unordered(self.config.discovery_workers)
            .filter_map(|hit| async move { hit })
            .collect()
            .await;

        let mut added = 0;
        for (addr, family, client) in found {
            if self.registry.contains(&addr) {
                continue;
            }
            self.adopt(&addr, family, client, None, true, true).await;
            added += 1;
        }
        info!(added, total = self.registry.len(), "Discovery complete");
        Ok(added)
    }

    async fn adopt(
        &self,
        addr: &str,
        family: DeviceFamily,
        client: Arc<dyn DeviceClient>,
        custom_name: Option<String>,
        auto_tune_enabled: bool,
        apply_stock: bool,
    ) {
        let profile = *ThermalProfile::for_family(family);
        let mut controller = ThermalController::with_timing(
            profile,
            self.config.cooldown_duration,
            self.config.adjustment_interval,
        );
        controller.set_auto_tune(auto_tune_enabled);
        controller.set_global_auto_tune(self.global_auto_tune.load(Ordering::Relaxed));

        // Newly discovered controllable hardware starts from a known
        // state rather than whatever its last owner left behind.
        if apply_stock && family.supports_frequency_control() {
            let stock = DeviceSettings::frequency(profile.default_freq_mhz);
            if let Err(e) = client.apply_settings(addr, stock).await {
                warn!(addr, error = %e, "Could not apply stock settings");
            }
        }

        let mut device = Device::new(addr, family);
        device.custom_name = custom_name.clone();
        info!(addr, %family, "Managing device");
        self.registry.insert(device, client, controller);

        if apply_stock {
            let row = DeviceRow {
                addr: addr.to_string(),
                family,
                custom_name,
                auto_tune_enabled,
            };
            if let Err(e) = self.store.upsert_device(row).await {
                warn!(addr, error = %e, "Could not persist device");
            }
        }
    }

    /// Drive the control tick until cancellation. A tick in flight runs
    /// to completion; it is bounded by the tick deadline internally.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        info!("Fleet orchestrator stopped.");
    }

    /// One control cycle over the whole fleet.
    pub async fn tick(&self) {
        let directive = self.current_directive().await;
        let handles = self.registry.poll_handles();
        if handles.is_empty() {
            return;
        }

        let completed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let polls = stream::iter(handles.clone()).for_each_concurrent(
            self.config.poll_workers,
            |handle| {
                let completed = Arc::clone(&completed);
                async move {
                    let addr = handle.addr.clone();
                    self.poll_device(handle, directive).await;
                    completed.lock().insert(addr);
                }
            },
        );

        if tokio::time::timeout(self.config.tick_deadline, polls)
            .await
            .is_err()
        {
            // Whatever didn't finish is offline for this tick.
            let stragglers: Vec<String> = {
                let completed = completed.lock();
                handles
                    .iter()
                    .map(|h| h.addr.clone())
                    .filter(|addr| !completed.contains(addr))
                    .collect()
            };
            for addr in stragglers {
                warn!(addr, "Poll missed the tick deadline, treating as offline");
                if self.registry.record_offline(&addr) == Some(Transition::WentOffline) {
                    self.emit(Alert::miner_offline(&addr)).await;
                }
            }
        }

        let best = self.store.best_difficulty_ever().await.unwrap_or_default();
        let stats = self.registry.stats(best);
        debug!(
            online = stats.online,
            offline = stats.offline,
            overheated = stats.overheated,
            hashrate_ghs = stats.total_hashrate_hs / 1e9,
            "Tick complete"
        );
    }

    pub async fn stats(&self) -> FleetStats {
        let best = self.store.best_difficulty_ever().await.unwrap_or_default();
        self.registry.stats(best)
    }

    /// Pin a device at a frequency and stop auto-tuning it.
    pub async fn force_frequency(&self, addr: &str, mhz: u16) -> Result<u16> {
        let handle = self
            .registry
            .handle(addr)
            .ok_or_else(|| Error::Config(format!("unknown device {addr}")))?;
        if !handle.family.supports_frequency_control() {
            return Err(Error::Config(format!(
                "{addr} ({}) does not support frequency control",
                handle.family
            )));
        }

        let clamped = handle.controller.lock().force_frequency(mhz);
        handle
            .client
            .apply_settings(addr, DeviceSettings::frequency(clamped))
            .await?;
        self.persist_preferences(addr).await;
        Ok(clamped)
    }

    pub async fn set_auto_tune(&self, addr: &str, enabled: bool) -> Result<()> {
        self.registry
            .with_controller(addr, |c| c.set_auto_tune(enabled))
            .ok_or_else(|| Error::Config(format!("unknown device {addr}")))?;
        self.persist_preferences(addr).await;
        Ok(())
    }

    /// Back to stock settings and auto-tune.
    pub async fn reset_device(&self, addr: &str) -> Result<()> {
        let handle = self
            .registry
            .handle(addr)
            .ok_or_else(|| Error::Config(format!("unknown device {addr}")))?;

        let default = {
            let mut controller = handle.controller.lock();
            controller.reset();
            controller.profile().default_freq_mhz
        };
        if handle.family.supports_frequency_control() {
            handle
                .client
                .apply_settings(addr, DeviceSettings::frequency(default))
                .await?;
        }
        self.persist_preferences(addr).await;
        Ok(())
    }

    async fn persist_preferences(&self, addr: &str) {
        let Some(device) = self.registry.device(addr) else {
            return;
        };
        let auto_tune_enabled = self
            .registry
            .with_controller(addr, |c| c.auto_tune_enabled())
            .unwrap_or(true);
        let row = DeviceRow {
            addr: device.addr,
            family: device.family,
            custom_name: device.custom_name,
            auto_tune_enabled,
        };
        if let Err(e) = self.store.upsert_device(row).await {
            warn!(addr, error = %e, "Could not persist device preferences");
        }
    }

    /// The schedule directive for this instant, if any. Store failures
    /// log and disable overrides for the tick rather than stalling it.
    async fn current_directive(&self) -> Option<ScheduleDirective> {
        let rows = match self.store.schedule_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not load schedule, skipping overrides");
                return None;
            }
        };
        if rows.is_empty() {
            return None;
        }
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        ScheduleEngine::new(rows).directive_at(now.weekday(), now.time())
    }

    /// The full per-device pipeline for one tick.
    async fn poll_device(&self, handle: PollHandle, directive: Option<ScheduleDirective>) {
        let addr = handle.addr.clone();

        // Schedule first: an expensive-hour cap must land even if the
        // status poll afterwards fails.
        self.apply_directive(&handle, directive).await;

        let poll = handle.client.get_status(&addr);
        let snapshot = match tokio::time::timeout(self.config.poll_timeout, poll).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) if !e.is_transient() => {
                // The device answered garbage: keep its previous state.
                warn!(addr, error = %e, "Protocol error, retaining previous state");
                return;
            }
            Ok(Err(e)) => {
                debug!(addr, error = %e, "Device unreachable");
                self.mark_offline(&addr).await;
                return;
            }
            Err(_) => {
                debug!(addr, "Status poll timed out");
                self.mark_offline(&addr).await;
                return;
            }
        };

        let profile = *handle.controller.lock().profile();
        let temp = snapshot.temperature_c;
        let health = if snapshot.overheat_mode {
            DeviceHealth::Overheated
        } else if temp.is_some_and(|t| t >= profile.warning_temp_c) {
            DeviceHealth::Overheating
        } else {
            DeviceHealth::Online
        };

        let transition = self
            .registry
            .record_result(&addr, health, Some(snapshot.clone()));
        if transition == Some(Transition::CameOnline) {
            self.emit(Alert::miner_online(&addr)).await;
        }

        self.persist_sample(&addr, health, &snapshot).await;

        if health == DeviceHealth::Overheated {
            // Firmware protection is in charge; no thermal control until
            // the device cools and reboots.
            self.handle_overheated(&handle, &snapshot).await;
            return;
        }
        self.clear_overheat_tracking(&handle).await;

        if let Some(t) = temp {
            if t >= profile.critical_temp_c {
                self.emit(Alert::critical_temperature(&addr, t)).await;
            } else if t >= profile.warning_temp_c {
                self.emit(Alert::high_temperature(&addr, t)).await;
            }
        }

        let decision = handle.controller.lock().on_sample(temp);

        // Fan before frequency: airflow leads any frequency move.
        if handle.family.supports_fan_control()
            && snapshot.fan_percent != Some(decision.fan_percent)
        {
            let settings = DeviceSettings::fan(decision.fan_percent);
            if let Err(e) = handle.client.apply_settings(&addr, settings).await {
                warn!(addr, error = %e, "Could not set fan speed");
            }
        }

        let applied = match decision.frequency {
            FrequencyAction::Hold => None,
            FrequencyAction::Set(mhz) => Some(mhz),
            // These devices cannot be powered off remotely; the lowest
            // safe frequency is the shutdown.
            FrequencyAction::EmergencyStop => {
                self.emit(Alert::emergency_shutdown(&addr, temp.unwrap_or(0.0)))
                    .await;
                Some(profile.min_freq_mhz)
            }
        };
        let Some(mhz) = applied else {
            return;
        };
        if !handle.family.supports_frequency_control() {
            debug!(addr, mhz, "Frequency change wanted but not supported");
            return;
        }
        if let Err(e) = handle
            .client
            .apply_settings(&addr, DeviceSettings::frequency(mhz))
            .await
        {
            warn!(addr, error = %e, "Could not set frequency");
        }
        let reason = decision.reason.to_ascii_lowercase();
        if reason.contains("emergency") || reason.contains("critical") {
            self.emit(Alert::frequency_adjusted(&addr, mhz, &decision.reason))
                .await;
        }
    }

    async fn apply_directive(&self, handle: &PollHandle, directive: Option<ScheduleDirective>) {
        let Some(directive) = directive else {
            return;
        };
        if !handle.family.supports_frequency_control() {
            return;
        }

        let (current, clamped) = {
            let mut controller = handle.controller.lock();
            // An emergency-stopped device stays down until its cooldown
            // expires, whatever the schedule says.
            if controller.control_state() == ControlState::Cooldown {
                debug!(addr = %handle.addr, "Schedule override deferred during cooldown");
                return;
            }
            let target = match directive {
                ScheduleDirective::Unlimited => return,
                ScheduleDirective::Shutdown => {
                    // No remote power-off; park at the floor instead.
                    controller.profile().min_freq_mhz
                }
                ScheduleDirective::Target(mhz) => mhz,
            };
            let current = controller.current_frequency();
            (current, controller.cap_frequency(target))
        };
        if clamped == current {
            return;
        }
        debug!(addr = %handle.addr, from_mhz = current, to_mhz = clamped, "Schedule override");
        if let Err(e) = handle
            .client
            .apply_settings(&handle.addr, DeviceSettings::frequency(clamped))
            .await
        {
            warn!(addr = %handle.addr, error = %e, "Could not apply schedule override");
        }
    }

    async fn handle_overheated(&self, handle: &PollHandle, snapshot: &TelemetrySnapshot) {
        let addr = handle.addr.as_str();
        let (reboot_wanted, overheated_for) = {
            let mut overheated = self.overheated.lock();
            let tracking = overheated
                .entry(addr.to_string())
                .or_insert_with(|| OverheatTracking {
                    since: Instant::now(),
                    reboot_attempted: false,
                });
            let cooled = snapshot
                .temperature_c
                .is_some_and(|t| t <= self.config.overheat_recovery_temp_c);
            (
                self.config.auto_reboot_on_recovery && cooled && !tracking.reboot_attempted,
                tracking.since.elapsed(),
            )
        };
        if !reboot_wanted {
            return;
        }

        let temp = snapshot.temperature_c.unwrap_or(0.0);
        match handle.client.restart(addr).await {
            Ok(()) => {
                info!(
                    addr,
                    temp_c = temp,
                    overheated_for_s = overheated_for.as_secs(),
                    "Rebooting overheated device"
                );
                self.overheated
                    .lock()
                    .entry(addr.to_string())
                    .and_modify(|t| t.reboot_attempted = true);
                self.emit(Alert::overheat_recovery(addr, temp)).await;
            }
            Err(e) => {
                warn!(addr, error = %e, "Reboot of overheated device failed");
            }
        }
    }

    /// A device polling healthy again leaves overheat tracking; stock
    /// settings go back on so it resumes from a known state.
    async fn clear_overheat_tracking(&self, handle: &PollHandle) {
        let addr = handle.addr.as_str();
        let was_tracked = {
            let mut overheated = self.overheated.lock();
            overheated.remove(addr).is_some()
        };
        if !was_tracked {
            return;
        }

        let held = {
            let overheated = self.overheated.lock();
            overheated.len()
        };
        let default = {
            let mut controller = handle.controller.lock();
            controller.reset();
            controller.profile().default_freq_mhz
        };
        info!(addr, still_overheated = held, "Recovered from overheat, restoring stock settings");
        if handle.family.supports_frequency_control() {
            let settings = DeviceSettings::frequency(default);
            if let Err(e) = handle.client.apply_settings(addr, settings).await {
                warn!(addr, error = %e, "Could not restore stock settings");
            }
        }
    }

    async fn mark_offline(&self, addr: &str) {
        if self.registry.record_offline(addr) == Some(Transition::WentOffline) {
            self.emit(Alert::miner_offline(addr)).await;
        }
    }

    async fn persist_sample(&self, addr: &str, health: DeviceHealth, snapshot: &TelemetrySnapshot) {
        let sample = StatsSample {
            addr: addr.to_string(),
            at: OffsetDateTime::now_utc(),
            health,
            hashrate_hs: snapshot.hashrate_hs,
            temperature_c: snapshot.temperature_c,
            power_w: snapshot.power_w,
            fan_percent: snapshot.fan_percent,
            frequency_mhz: snapshot.frequency_mhz,
            shares_accepted: snapshot.shares_accepted,
            shares_rejected: snapshot.shares_rejected,
            best_difficulty: snapshot.best_difficulty.clone(),
        };
        if let Err(e) = self.store.add_sample(sample).await {
            warn!(addr, error = %e, "Could not persist telemetry sample");
        }
    }

    async fn emit(&self, alert: Alert) {
        if self.alert_tx.send(alert).await.is_err() {
            debug!("Alert channel closed");
        }
    }
}

fn fallback_client(family: DeviceFamily, timeout: Duration) -> Option<Arc<dyn DeviceClient>> {
    let name = if family.supports_frequency_control() {
        "esp-miner"
    } else {
        "cgminer"
    };
    ClientRegistry::descriptors()
        .into_iter()
        .find(|d| d.name == name)
        .map(|d| (d.create_fn)(timeout))
}

/// Expand a CIDR subnet into its host addresses. Network and broadcast
/// addresses are skipped for prefixes shorter than /31.
fn expand_subnet(subnet: &str) -> Result<Vec<String>> {
    let (base, prefix) = subnet
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid subnet {subnet:?}, expected CIDR")))?;
    let base: Ipv4Addr = base
        .parse()
        .map_err(|_| Error::Config(format!("invalid subnet address in {subnet:?}")))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| Error::Config(format!("invalid prefix in {subnet:?}")))?;
    if !(16..=32).contains(&prefix) {
        return Err(Error::Config(format!(
            "prefix /{prefix} out of range, expected /16 to /32"
        )));
    }

    let mask = u32::MAX << (32 - prefix) as u32;
    let network = u32::from(base) & mask;
    let size = 1u32 << (32 - prefix);
    let hosts: std::ops::Range<u32> = if prefix >= 31 { 0..size } else { 1..size - 1 };
    Ok(hosts
        .map(|offset| Ipv4Addr::from(network + offset).to_string())
        .collect())
}

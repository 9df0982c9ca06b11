//! Fleet manager daemon.
//!
//! Wires the store, alert pipeline, and orchestrator together, then runs
//! until SIGINT or SIGTERM. Configuration comes from `AXEFLEET_*`
//! environment variables; see [`axefleet::config::FleetConfig`].

use std::env;
use std::sync::Arc;

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use axefleet::alert::{self, AlertGate, LogNotifier, Notifier, WebhookNotifier};
use axefleet::config::FleetConfig;
use axefleet::device::{sim::SimulatedClient, Device, DeviceFamily, TelemetrySnapshot};
use axefleet::fleet::{FleetOrchestrator, FleetRegistry};
use axefleet::store::{FleetStore, MemoryStore};
use axefleet::thermal::{ThermalController, ThermalProfile};
use axefleet::tracing::prelude::*;

/// The main daemon.
struct Daemon {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    async fn run(self) -> anyhow::Result<()> {
        let config = FleetConfig::from_env();
        let store: Arc<dyn FleetStore> = Arc::new(MemoryStore::new());
        let registry = Arc::new(FleetRegistry::new());

        // Hardware-free rehearsal: AXEFLEET_SIM_DEVICES=n runs n scripted
        // miners through the same control loop as real hardware.
        let sim_count: usize = env::var("AXEFLEET_SIM_DEVICES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        for i in 0..sim_count {
            let sim = SimulatedClient::new();
            sim.push_snapshot(TelemetrySnapshot {
                hashrate_hs: 500e9,
                temperature_c: Some(58.0),
                power_w: 13.0,
                fan_percent: Some(35),
                frequency_mhz: Some(490),
                model: Some("BM1366".into()),
                ..TelemetrySnapshot::default()
            });
            let mut device = Device::new(format!("sim-{i}"), DeviceFamily::Bitaxe);
            device.is_simulated = true;
            let profile = *ThermalProfile::for_family(DeviceFamily::Bitaxe);
            registry.insert(device, sim, ThermalController::new(profile));
        }
        if sim_count > 0 {
            info!(count = sim_count, "Simulated miners registered");
        }

        // Alert pipeline: emitters drop alerts on the channel, a single
        // task owns the dedup gate and the delivery sinks.
        let (alert_tx, alert_rx) = mpsc::channel(100);
        let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if !config.webhook_urls.is_empty() {
            info!(endpoints = config.webhook_urls.len(), "Webhook alerts enabled");
            notifiers.push(Box::new(WebhookNotifier::new(config.webhook_urls.clone())));
        }
        self.tracker.spawn(alert::notifier::task(
            alert_rx,
            AlertGate::new(config.alert_cooldown),
            notifiers,
            self.shutdown.clone(),
        ));

        let orchestrator = Arc::new(FleetOrchestrator::new(
            config,
            registry,
            store,
            alert_tx,
        ));

        // Bring back devices we already know, then sweep the subnet for
        // new ones. Neither failing should stop the control loop.
        if let Err(e) = orchestrator.load_devices().await {
            error!("Failed to load stored devices: {}", e);
        }
        if let Err(e) = orchestrator.discover().await {
            error!("Discovery failed: {}", e);
        }

        self.tracker.spawn({
            let orchestrator = orchestrator.clone();
            let shutdown = self.shutdown.clone();
            async move {
                orchestrator.run(shutdown).await;
            }
        });

        self.tracker.close();

        info!("Started.");
        info!("For debugging, set RUST_LOG=axefleet=debug or trace.");

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT.");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
            },
        }

        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    axefleet::tracing::init_journald_or_stdout();
    Daemon::new().run().await
}

//! Alert delivery sinks and the notifier task.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::event::{Alert, Severity};
use super::gate::AlertGate;
use crate::error::Result;
use crate::tracing::prelude::*;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A delivery sink for alerts. Failures are the sink's problem to
/// describe and the task's problem to log; nothing retries.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the program log. Always configured, so a fleet with
/// no webhook still records every alert.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        let device = alert.device.as_deref().unwrap_or("fleet");
        match alert.severity {
            Severity::Info => info!(
                alert_type = %alert.alert_type,
                device,
                "{}",
                alert.message
            ),
            Severity::Warning => warn!(
                alert_type = %alert.alert_type,
                device,
                "{}",
                alert.message
            ),
            Severity::Critical | Severity::Emergency => error!(
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                device,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs each alert as JSON to the configured endpoints.
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            urls,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        for url in &self.urls {
            self.client
                .post(url)
                .timeout(WEBHOOK_TIMEOUT)
                .json(alert)
                .send()
                .await?
                .error_for_status()
                .map_err(crate::error::Error::from)?;
        }
        Ok(())
    }
}

/// Consume alerts until cancellation or channel close. The task owns the
/// gate, so emitters never block on dedup bookkeeping.
pub async fn task(
    mut rx: mpsc::Receiver<Alert>,
    mut gate: AlertGate,
    notifiers: Vec<Box<dyn Notifier>>,
    cancellation: CancellationToken,
) {
    loop {
        let alert = tokio::select! {
            _ = cancellation.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(alert) => alert,
                None => break,
            },
        };

        if !gate.should_send(&alert) {
            debug!(
                alert_type = %alert.alert_type,
                device = alert.device.as_deref(),
                "Alert suppressed by cooldown"
            );
            continue;
        }
        gate.record_sent(&alert);

        for notifier in &notifiers {
            if let Err(e) = notifier.notify(&alert).await {
                warn!(
                    notifier = notifier.name(),
                    alert_type = %alert.alert_type,
                    error = %e,
                    "Alert delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingNotifier {
        delivered: Arc<Mutex<Vec<Alert>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, alert: &Alert) -> Result<()> {
            self.delivered.lock().push(alert.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn notify(&self, _alert: &Alert) -> Result<()> {
            Err(crate::error::Error::Transient("endpoint down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_deliver_once_and_suppress_repeats() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(task(
            rx,
            AlertGate::new(Duration::from_secs(900)),
            vec![Box::new(RecordingNotifier {
                delivered: delivered.clone(),
            }) as Box<dyn Notifier>],
            cancellation.clone(),
        ));

        tx.send(Alert::miner_offline("10.0.0.7")).await.unwrap();
        tx.send(Alert::miner_offline("10.0.0.7")).await.unwrap();
        tx.send(Alert::miner_offline("10.0.0.8")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let delivered = delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].device.as_deref(), Some("10.0.0.7"));
        assert_eq!(delivered[1].device.as_deref(), Some("10.0.0.8"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_survive_sink_failures() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();

        // The failing sink comes first; the recording sink must still
        // receive every alert.
        let handle = tokio::spawn(task(
            rx,
            AlertGate::new(Duration::from_secs(900)),
            vec![
                Box::new(FailingNotifier) as Box<dyn Notifier>,
                Box::new(RecordingNotifier {
                    delivered: delivered.clone(),
                }) as Box<dyn Notifier>,
            ],
            cancellation.clone(),
        ));

        tx.send(Alert::high_temperature("10.0.0.7", 66.5))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(delivered.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_on_cancellation() {
        let (_tx, rx) = mpsc::channel::<Alert>(8);
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(task(
            rx,
            AlertGate::new(Duration::from_secs(900)),
            Vec::new(),
            cancellation.clone(),
        ));

        cancellation.cancel();
        handle.await.unwrap();
    }
}

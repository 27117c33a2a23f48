// src/health/monitor.rs
use crate::health::{HealthChecker, HealthReport};
use crate::store::{AppRegistry, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Runs a full check on a fixed interval until shut down.
pub struct HealthMonitor {
    checker: Arc<HealthChecker>,
    registry: Arc<dyn AppRegistry>,
    every: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(checker: Arc<HealthChecker>, registry: Arc<dyn AppRegistry>, every: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            checker,
            registry,
            every,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.every);
        // a slow pass must not trigger a burst of catch-up passes
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health monitor with interval: {:?}", self.every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Health monitor could not list apps: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn run_once(&self) -> Result<HealthReport, StoreError> {
        let apps = self.registry.list_app_refs().await?;
        let report = self.checker.check_health(apps).await;

        for result in report.apps.iter().filter(|r| !r.is_up()) {
            warn!(
                "App {} ({}) is down: {}",
                result.name,
                result.url,
                result
                    .error
                    .clone()
                    .or_else(|| result.status_code.map(|c| format!("HTTP {}", c)))
                    .unwrap_or_default()
            );
        }

        Ok(report)
    }
}

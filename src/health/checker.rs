// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::health::probe::{ProbeError, Prober};
use crate::health::report::{AppRef, HealthReport, HealthResult};
use crate::metrics::MetricsCollector;
use chrono::Utc;
use reqwest::Method;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Probes every app concurrently and assembles a report in input order.
pub struct HealthChecker {
    prober: Prober,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HealthChecker {
    pub fn new(
        config: &HealthCheckConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, ProbeError> {
        Ok(Self {
            prober: Prober::new(config)?,
            metrics,
        })
    }

    pub async fn check_health(self: &Arc<Self>, apps: Vec<AppRef>) -> HealthReport {
        let checked_at = Utc::now();

        if apps.is_empty() {
            return HealthReport::empty(checked_at);
        }

        let started = Instant::now();
        let mut tasks = Vec::with_capacity(apps.len());
        for app in apps.iter().cloned() {
            let checker = self.clone();
            tasks.push(tokio::spawn(async move { checker.probe_app(&app).await }));
        }

        // join_all keeps the order of `tasks`, not completion order
        let joined = futures::future::join_all(tasks).await;

        let report = HealthReport {
            checked_at,
            apps: collect_results(&apps, joined, started),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_report(&report);
        }

        info!(
            "Health check complete: {} up, {} down",
            report.up_count(),
            report.down_count()
        );

        report
    }

    /// HEAD first; GET when HEAD is unsupported or fails at the transport level.
    pub async fn probe_app(&self, app: &AppRef) -> HealthResult {
        let start = Instant::now();
        let mut last_error: Option<ProbeError> = None;

        for method in [Method::HEAD, Method::GET] {
            match self.prober.perform_request(&app.url, method.clone()).await {
                Ok(outcome) if method == Method::HEAD && matches!(outcome.status_code, 405 | 501) => {
                    debug!(
                        "App {} answered HEAD with {}, retrying with GET",
                        app.name, outcome.status_code
                    );
                }
                Ok(outcome) => {
                    let result = HealthResult::responded(app, outcome.status_code, elapsed_ms(start));
                    if result.is_up() {
                        debug!("App {} is up ({})", app.name, outcome.status_code);
                    } else {
                        warn!("App {} is down: HTTP {}", app.name, outcome.status_code);
                    }
                    return result;
                }
                Err(e) => {
                    debug!("{} {} failed: {}", method, app.url, e);
                    last_error = Some(e);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Request failed".to_string());
        warn!("App {} is unreachable: {}", app.name, message);

        HealthResult::unreachable(app, message, elapsed_ms(start))
    }
}

/// Pairs task outcomes with their apps. A task that died is reported as
/// unreachable after the time spent since the batch started.
fn collect_results(
    apps: &[AppRef],
    joined: Vec<Result<HealthResult, JoinError>>,
    started: Instant,
) -> Vec<HealthResult> {
    apps.iter()
        .zip(joined)
        .map(|(app, outcome)| match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("Probe task for app {} failed: {}", app.id, e);
                HealthResult::unreachable(app, format!("Probe task failed: {}", e), elapsed_ms(started))
            }
        })
        .collect()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

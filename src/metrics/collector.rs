// src/metrics/collector.rs
use crate::health::{HealthReport, HealthResult};
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // API metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // Probe metrics
    pub health_checks_total: IntCounterVec,
    pub probe_duration_seconds: HistogramVec,
    pub app_up: IntGaugeVec,
    pub apps_total: IntGauge,

    // serializes the reset and refill of the per-app gauges
    snapshot: Mutex<()>,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let http_requests_total = IntCounterVec::new(
            Opts::new("tabloo_http_requests_total", "Total number of API requests"),
            &["method", "route", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tabloo_http_request_duration_seconds",
                "API request duration in seconds",
            ),
            &["method", "route"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let health_checks_total = IntCounterVec::new(
            Opts::new("tabloo_health_checks_total", "Total app probes by outcome"),
            &["status"],
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tabloo_probe_duration_seconds",
                "Wall-clock duration of a single app probe",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 7.5, 15.0]),
            &["status"],
        )?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;

        let app_up = IntGaugeVec::new(
            Opts::new("tabloo_app_up", "App reachability from the last check (1=up, 0=down)"),
            &["id", "name"],
        )?;
        registry.register(Box::new(app_up.clone()))?;

        let apps_total = IntGauge::new("tabloo_apps_total", "Apps covered by the last check")?;
        registry.register(Box::new(apps_total.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
            health_checks_total,
            probe_duration_seconds,
            app_up,
            apps_total,
            snapshot: Mutex::new(()),
        })
    }

    pub fn record_request(&self, method: &str, route: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.http_requests_total
            .with_label_values(&[method, route, &status])
            .inc();

        self.http_request_duration_seconds
            .with_label_values(&[method, route])
            .observe(duration.as_secs_f64());
    }

    /// Counts every result, then replaces the per-app gauges with this
    /// report's view. Concurrent reports never interleave their gauges.
    pub fn record_report(&self, report: &HealthReport) {
        for result in &report.apps {
            self.record_probe(result);
        }

        let _guard = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        self.app_up.reset();
        for result in &report.apps {
            let id = result.id.to_string();
            self.app_up
                .with_label_values(&[id.as_str(), result.name.as_str()])
                .set(i64::from(result.is_up()));
        }
        self.apps_total.set(report.apps.len() as i64);
    }

    fn record_probe(&self, result: &HealthResult) {
        let status = result.status.as_str();
        self.health_checks_total.with_label_values(&[status]).inc();
        self.probe_duration_seconds
            .with_label_values(&[status])
            .observe(result.latency_ms as f64 / 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{AppRef, HealthResult};

    fn app(id: i64, name: &str) -> AppRef {
        AppRef {
            id,
            name: name.to_string(),
            url: format!("http://192.168.1.{}/", id),
            tag: None,
            section: None,
        }
    }

    fn report(results: Vec<HealthResult>) -> HealthReport {
        HealthReport {
            checked_at: chrono::Utc::now(),
            apps: results,
        }
    }

    #[test]
    fn test_probe_metrics_are_exported() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_report(&report(vec![HealthResult::responded(&app(1, "Pi-hole"), 200, 40)]));
        metrics.record_request("GET", "/api/apps", 200, Duration::from_millis(3));

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains(r#"tabloo_app_up{id="1",name="Pi-hole"} 1"#));
        assert!(text.contains(r#"tabloo_health_checks_total{status="up"} 1"#));
        assert!(text.contains("tabloo_apps_total 1"));
        assert!(text.contains(r#"route="/api/apps""#));
    }

    #[test]
    fn test_duplicate_names_keep_separate_gauges() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_report(&report(vec![
            HealthResult::responded(&app(1, "NAS"), 200, 10),
            HealthResult::unreachable(&app(2, "NAS"), "Request timed out".to_string(), 7000),
        ]));

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains(r#"tabloo_app_up{id="1",name="NAS"} 1"#));
        assert!(text.contains(r#"tabloo_app_up{id="2",name="NAS"} 0"#));
        assert!(text.contains("tabloo_apps_total 2"));
    }

    #[test]
    fn test_concurrent_reports_leave_a_whole_snapshot() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        let small = report(vec![HealthResult::responded(&app(1, "a"), 200, 1)]);
        let large = report((10..60).map(|id| HealthResult::responded(&app(id, "b"), 200, 1)).collect());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        metrics.record_report(&small);
                        metrics.record_report(&large);
                    }
                });
            }
        });

        // every writer finished on `large`, so exactly its gauges remain
        let families = registry.registry.gather();
        let app_up = families
            .iter()
            .find(|family| family.get_name() == "tabloo_app_up")
            .unwrap();
        assert_eq!(app_up.get_metric().len(), 50);
    }
}

// src/health/mod.rs
mod checker;
mod monitor;
mod probe;
mod report;

pub use checker::HealthChecker;
pub use monitor::HealthMonitor;
pub use probe::{is_redirect, ProbeError, ProbeOutcome, Prober};
pub use report::{AppRef, AppStatus, HealthReport, HealthResult};

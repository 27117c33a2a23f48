// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "TablooHealth/1.0 (+https://tabloo)";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub health: HealthCheckConfig,
    pub metrics: MetricsConfig,
    pub uploads: UploadsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db/app.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Per-request timeout, applied to every hop of every attempt.
    pub timeout_ms: u64,
    pub max_redirects: u32,
    pub user_agent: String,
    /// Background monitor interval. Disabled when absent.
    pub poll_interval_secs: Option<u64>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 7000,
            max_redirects: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_interval_secs: None,
        }
    }
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    /// Also served under `/uploads/`.
    pub dir: PathBuf,
    pub max_file_bytes: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("public/uploads"),
            max_file_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.health.timeout_ms == 0 {
            bail!("health.timeout_ms must be greater than zero");
        }
        if self.health.user_agent.trim().is_empty() {
            bail!("health.user_agent must not be empty");
        }
        if self.health.poll_interval_secs == Some(0) {
            bail!("health.poll_interval_secs must be greater than zero when set");
        }
        if !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/'");
        }
        if self.uploads.max_file_bytes == 0 {
            bail!("uploads.max_file_bytes must be greater than zero");
        }
        Ok(())
    }

    /// Apply `HOST`, `PORT`, `TABLOO_DB_PATH` and `TABLOO_UPLOADS_DIR` from the environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {:?}: {}", port, e))?;
        }
        if let Some(path) = lookup("TABLOO_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("TABLOO_UPLOADS_DIR") {
            self.uploads.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Resolve `server.host` (IP literal or hostname) to the first matching address.
    pub async fn listen_addr(&self) -> Result<SocketAddr> {
        let host = self.server.host.as_str();
        tokio::net::lookup_host((host, self.server.port))
            .await
            .map_err(|e| anyhow::anyhow!("cannot resolve listen host {}: {}", host, e))?
            .next()
            .ok_or_else(|| anyhow::anyhow!("listen host {} resolved to no addresses", host))
    }
}

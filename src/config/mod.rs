// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
        }
        _ => serde_json::from_str(&contents).context("Failed to parse JSON config")?,
    };

    config.validate()?;
    Ok(config)
}

/// Resolve the runtime configuration: an explicit path must exist, the
/// default `config.yaml` is optional. Environment overrides win.
pub async fn resolve_config(explicit: Option<&str>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config(path).await?,
        None if Path::new("config.yaml").exists() => load_config("config.yaml").await?,
        None => Config::default(),
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_yaml_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 8088\nhealth:\n  timeout_ms: 1500\n  poll_interval_secs: 30\n"
        )
        .unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.health.timeout_ms, 1500);
        assert_eq!(config.health.max_redirects, 3);
        assert_eq!(config.health.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.health.poll_interval_secs, Some(30));
        assert!(!config.metrics.enabled);
    }

    #[tokio::test]
    async fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"metrics": {{"enabled": true, "port": 9100}}}}"#).unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
        assert_eq!(config.metrics.path, "/metrics");
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "health:\n  timeout_ms: 0\n").unwrap();

        let err = load_config(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        assert!(load_config("/nonexistent/tabloo.yaml").await.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_metrics_path() {
        let mut config = Config::default();
        config.metrics.path = "metrics".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.poll_interval_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_listen_addr_accepts_hostnames() {
        let mut config = Config::default();
        config.server.host = "localhost".to_string();
        config.server.port = 4000;

        let addr = config.listen_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4000);

        config.server.host = "127.0.0.1".to_string();
        assert_eq!(config.listen_addr().await.unwrap().to_string(), "127.0.0.1:4000");

        config.server.host = "no such host..invalid".to_string();
        assert!(config.listen_addr().await.is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(|key| match key {
                "PORT" => Some("4000".to_string()),
                "TABLOO_DB_PATH" => Some("/tmp/tabloo.db".to_string()),
                "TABLOO_UPLOADS_DIR" => Some("/srv/icons".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.path, std::path::PathBuf::from("/tmp/tabloo.db"));
        assert_eq!(config.uploads.dir, std::path::PathBuf::from("/srv/icons"));
        assert_eq!(config.uploads.max_file_bytes, 8 * 1024 * 1024);

        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == "PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }
}

// src/health/probe.rs
// One HTTP attempt per call, redirects followed by hand so the hop budget
// stays explicit.
use crate::config::HealthCheckConfig;
use reqwest::header::LOCATION;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Request timed out")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid redirect location {location:?}: {reason}")]
    InvalidRedirect { location: String, reason: String },

    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status_code: u16,
}

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
    timeout: Duration,
    max_redirects: u32,
}

impl Prober {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
        })
    }

    /// Issue `method` against `url`, following up to `max_redirects` hops.
    /// A redirect that cannot be followed further is returned as-is.
    pub async fn perform_request(&self, url: &str, method: Method) -> Result<ProbeOutcome, ProbeError> {
        let mut current = parse_target(url)?;
        let mut hops = 0;

        loop {
            let (status, location) = self.send_once(&current, method.clone()).await?;

            match location {
                Some(location) if is_redirect(status) && hops < self.max_redirects => {
                    let next = current.join(&location).map_err(|e| ProbeError::InvalidRedirect {
                        location: location.clone(),
                        reason: e.to_string(),
                    })?;
                    debug!("{} {} -> {} ({})", method, current, next, status.as_u16());
                    current = next;
                    hops += 1;
                }
                _ => {
                    return Ok(ProbeOutcome {
                        status_code: status.as_u16(),
                    })
                }
            }
        }
    }

    async fn send_once(&self, url: &Url, method: Method) -> Result<(StatusCode, Option<String>), ProbeError> {
        let request = self.client.request(method, url.clone()).send();

        let response = match timeout(self.timeout, request).await {
            Ok(result) => result?,
            Err(_) => return Err(ProbeError::Timeout),
        };

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        // Body is never read.
        Ok((response.status(), location))
    }
}

fn parse_target(raw: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(raw).map_err(|e| ProbeError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProbeError::InvalidUrl(format!(
            "{}: unsupported scheme {}",
            raw, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_statuses() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200, 300, 304, 305, 404] {
            assert!(!is_redirect(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_parse_target() {
        assert!(parse_target("http://192.168.1.2:3000").is_ok());
        assert!(parse_target("https://nas.lan/admin?x=1").is_ok());
        assert!(matches!(parse_target("not a url"), Err(ProbeError::InvalidUrl(_))));
        assert!(matches!(parse_target("ftp://nas.lan"), Err(ProbeError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_network() {
        let prober = Prober::new(&HealthCheckConfig::default()).unwrap();
        let err = prober.perform_request("::nope::", Method::HEAD).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid URL"));
    }
}

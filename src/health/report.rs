// src/health/report.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// The part of a registered app the prober needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRef {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub tag: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Up,
    Down,
}

impl AppStatus {
    /// 2xx and 3xx count as reachable, everything else is down.
    pub fn from_status_code(code: u16) -> Self {
        if (200..400).contains(&code) {
            AppStatus::Up
        } else {
            AppStatus::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Up => "up",
            AppStatus::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub tag: Option<String>,
    pub section: Option<String>,
    pub status: AppStatus,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResult {
    /// A probe that got an HTTP response, whatever its status.
    pub fn responded(app: &AppRef, status_code: u16, latency_ms: u64) -> Self {
        Self {
            id: app.id,
            name: app.name.clone(),
            url: app.url.clone(),
            tag: app.tag.clone(),
            section: app.section.clone(),
            status: AppStatus::from_status_code(status_code),
            status_code: Some(status_code),
            latency_ms,
            error: None,
        }
    }

    /// A probe where no attempt produced a response.
    pub fn unreachable(app: &AppRef, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            id: app.id,
            name: app.name.clone(),
            url: app.url.clone(),
            tag: app.tag.clone(),
            section: app.section.clone(),
            status: AppStatus::Down,
            status_code: None,
            latency_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == AppStatus::Up
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    #[serde(serialize_with = "serialize_timestamp")]
    pub checked_at: DateTime<Utc>,
    pub apps: Vec<HealthResult>,
}

impl HealthReport {
    pub fn empty(checked_at: DateTime<Utc>) -> Self {
        Self {
            checked_at,
            apps: Vec::new(),
        }
    }

    pub fn up_count(&self) -> usize {
        self.apps.iter().filter(|r| r.is_up()).count()
    }

    pub fn down_count(&self) -> usize {
        self.apps.len() - self.up_count()
    }
}

fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

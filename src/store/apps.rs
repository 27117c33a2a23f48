// src/store/apps.rs
use super::error::{Result, StoreError};
use super::SqliteStore;
use crate::health::AppRef;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

const APP_COLUMNS: &str =
    "id, name, url, ip, description, tag, icon, section, created_at, updated_at, is_pinned";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub ip: Option<String>,
    pub description: Option<String>,
    pub tag: Option<String>,
    pub icon: Option<String>,
    pub section: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub is_pinned: bool,
}

impl App {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            ip: row.get(3)?,
            description: row.get(4)?,
            tag: row.get(5)?,
            icon: row.get(6)?,
            section: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            is_pinned: row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0,
        })
    }
}

/// Create/update payload as sent by the admin UI.
///
/// Parsing never fails on field types: a non-string `name` or `url` is
/// treated as missing so `validate_app` reports it.
#[derive(Debug, Clone, Default)]
pub struct NewApp {
    pub name: Option<String>,
    pub url: Option<String>,
    pub ip: Option<String>,
    pub description: Option<String>,
    pub tag: Option<String>,
    pub icon: Option<String>,
    pub section: Option<String>,
    pub is_pinned: bool,
}

impl NewApp {
    pub fn from_value(value: &Value) -> Self {
        Self {
            name: string_only(field(value, "name")),
            url: string_only(field(value, "url")),
            ip: text(field(value, "ip")),
            description: text(field(value, "description")),
            tag: text(field(value, "tag")),
            icon: text(field(value, "icon")),
            section: text(field(value, "section")),
            is_pinned: truthy(field(value, "is_pinned")),
        }
    }
}

impl<'de> Deserialize<'de> for NewApp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::from_value(&Value::deserialize(deserializer)?))
    }
}

static NULL: Value = Value::Null;

fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&NULL)
}

fn string_only(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

// Free-text fields keep scalars in their textual form.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// The UI sends booleans, but 0/1 and "true" show up from imports.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Returns every problem with the payload; empty means valid.
pub fn validate_app(app: &NewApp) -> Vec<String> {
    let mut errors = Vec::new();

    if app.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
        errors.push("Name is required and must be a non-empty string".to_string());
    }

    match app.url.as_deref() {
        None | Some("") => errors.push("URL is required".to_string()),
        Some(raw) => match url::Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(_) => errors.push("URL must use http or https protocol".to_string()),
            Err(_) => errors.push("Invalid URL format".to_string()),
        },
    }

    errors
}

/// HTML-escape free text before it is stored.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

fn clean(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(sanitize)
}

fn raw(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_owned)
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BulkError {
    Invalid { index: usize, errors: Vec<String> },
    Failed { index: usize, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkResult {
    pub created: Vec<App>,
    pub errors: Vec<BulkError>,
}

#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// Pinned apps first, newest first within each group.
    async fn list_apps(&self) -> Result<Vec<App>>;

    /// Health-check input, ordered by name ascending.
    async fn list_app_refs(&self) -> Result<Vec<AppRef>>;

    async fn get_app(&self, id: i64) -> Result<Option<App>>;

    /// Fails with `InvalidInput` when validation rejects the payload.
    async fn create_app(&self, app: NewApp) -> Result<App>;

    async fn update_app(&self, id: i64, app: NewApp) -> Result<Option<App>>;

    async fn delete_app(&self, id: i64) -> Result<bool>;

    async fn toggle_pin(&self, id: i64) -> Result<Option<App>>;

    /// Each entry is validated and inserted independently.
    async fn bulk_create(&self, apps: Vec<Value>) -> Result<BulkResult>;
}

fn insert_app(conn: &Connection, app: &NewApp) -> Result<App> {
    let errors = validate_app(app);
    if !errors.is_empty() {
        return Err(StoreError::InvalidInput(errors.join(", ")));
    }

    conn.execute(
        "INSERT INTO apps (name, url, ip, description, tag, icon, section, is_pinned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            clean(&app.name),
            app.url,
            raw(&app.ip),
            clean(&app.description),
            clean(&app.tag),
            raw(&app.icon),
            clean(&app.section),
            i64::from(app.is_pinned),
        ],
    )?;

    let id = conn.last_insert_rowid();
    fetch_app(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("app {}", id)))
}

fn fetch_app(conn: &Connection, id: i64) -> Result<Option<App>> {
    let sql = format!("SELECT {} FROM apps WHERE id = ?1", APP_COLUMNS);
    Ok(conn.query_row(&sql, params![id], App::from_row).optional()?)
}

#[async_trait]
impl AppRegistry for SqliteStore {
    async fn list_apps(&self) -> Result<Vec<App>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM apps ORDER BY is_pinned DESC, created_at DESC, id DESC",
                APP_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let apps = stmt
                .query_map([], App::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(apps)
        })
        .await
    }

    async fn list_app_refs(&self) -> Result<Vec<AppRef>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, url, tag, section FROM apps ORDER BY name ASC")?;
            let refs = stmt
                .query_map([], |row| {
                    Ok(AppRef {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        url: row.get(2)?,
                        tag: row.get(3)?,
                        section: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(refs)
        })
        .await
    }

    async fn get_app(&self, id: i64) -> Result<Option<App>> {
        self.with_conn(move |conn| fetch_app(conn, id)).await
    }

    async fn create_app(&self, app: NewApp) -> Result<App> {
        self.with_conn(move |conn| {
            let created = insert_app(conn, &app)?;
            debug!("Created app {} ({})", created.id, created.name);
            Ok(created)
        })
        .await
    }

    async fn update_app(&self, id: i64, app: NewApp) -> Result<Option<App>> {
        self.with_conn(move |conn| {
            let errors = validate_app(&app);
            if !errors.is_empty() {
                return Err(StoreError::InvalidInput(errors.join(", ")));
            }

            let changed = conn.execute(
                "UPDATE apps
                 SET name = ?1, url = ?2, ip = ?3, description = ?4, tag = ?5,
                     icon = ?6, section = ?7, is_pinned = ?8, updated_at = datetime('now')
                 WHERE id = ?9",
                params![
                    clean(&app.name),
                    app.url,
                    raw(&app.ip),
                    clean(&app.description),
                    clean(&app.tag),
                    raw(&app.icon),
                    clean(&app.section),
                    i64::from(app.is_pinned),
                    id,
                ],
            )?;

            if changed == 0 {
                return Ok(None);
            }
            fetch_app(conn, id)
        })
        .await
    }

    async fn delete_app(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM apps WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn toggle_pin(&self, id: i64) -> Result<Option<App>> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE apps
                 SET is_pinned = CASE WHEN is_pinned THEN 0 ELSE 1 END,
                     updated_at = datetime('now')
                 WHERE id = ?1",
                params![id],
            )?;

            if changed == 0 {
                return Ok(None);
            }
            fetch_app(conn, id)
        })
        .await
    }

    async fn bulk_create(&self, apps: Vec<Value>) -> Result<BulkResult> {
        self.with_conn(move |conn| {
            let mut result = BulkResult::default();

            for (index, value) in apps.into_iter().enumerate() {
                let app = NewApp::from_value(&value);

                let errors = validate_app(&app);
                if !errors.is_empty() {
                    result.errors.push(BulkError::Invalid { index, errors });
                    continue;
                }

                match insert_app(conn, &app) {
                    Ok(created) => result.created.push(created),
                    Err(e) => result.errors.push(BulkError::Failed {
                        index,
                        error: e.to_string(),
                    }),
                }
            }

            debug!(
                "Bulk create: {} created, {} rejected",
                result.created.len(),
                result.errors.len()
            );
            Ok(result)
        })
        .await
    }
}

// src/store/mod.rs
// SQLite-backed storage for apps, uploads and settings. All queries run on the
// blocking pool behind a single connection.
mod apps;
mod error;
mod settings;
mod uploads;

pub use apps::{sanitize, validate_app, App, AppRegistry, BulkError, BulkResult, NewApp};
pub use error::{Result, StoreError};
pub use settings::{decode_value, encode_value, SettingsStore};
pub use uploads::{NewUpload, Upload, UploadStore};

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS apps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    ip TEXT,
    description TEXT,
    tag TEXT,
    icon TEXT,
    section TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    is_pinned INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    original_name TEXT,
    size INTEGER,
    mime TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);
";

const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("timeWidgetEnabled", "false"),
    ("weatherWidgetEnabled", "false"),
    ("weatherLocation", ""),
    ("weatherLat", ""),
    ("weatherLon", ""),
    ("weatherTempUnit", "fahrenheit"),
    ("appHealthWidgetEnabled", "false"),
    ("appHealthCheckInterval", "60000"),
];

struct ExampleApp {
    name: &'static str,
    url: &'static str,
    ip: &'static str,
    description: &'static str,
    tag: &'static str,
    icon: &'static str,
    section: &'static str,
    pinned: bool,
}

const EXAMPLE_APPS: &[ExampleApp] = &[
    ExampleApp {
        name: "AdGuard Home",
        url: "http://192.168.1.2:3000",
        ip: "192.168.1.2",
        description: "Network-wide ad and tracker blocking",
        tag: "DNS",
        icon: "/uploads/adguard.svg",
        section: "Network",
        pinned: true,
    },
    ExampleApp {
        name: "Pi-hole",
        url: "http://192.168.1.3/admin",
        ip: "192.168.1.3",
        description: "DNS sinkhole for blocking ads",
        tag: "DNS",
        icon: "/uploads/pihole.svg",
        section: "Network",
        pinned: false,
    },
    ExampleApp {
        name: "Immich",
        url: "http://192.168.1.4:2283",
        ip: "192.168.1.4",
        description: "Self-hosted photo and video backup",
        tag: "Media",
        icon: "/uploads/immich.svg",
        section: "Media",
        pinned: true,
    },
];

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Opens or creates the database file, creating its directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                info!("Created database directory: {}", dir.display());
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Database(format!("Failed to set WAL mode: {e}")))?;

        initialize(&conn)?;
        info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts the example apps when the table is empty. Returns how many were added.
    pub async fn seed_example_apps(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM apps", [], |row| row.get(0))?;
            if count > 0 {
                return Ok(0);
            }

            let tx = conn.transaction()?;
            for app in EXAMPLE_APPS {
                tx.execute(
                    "INSERT INTO apps (name, url, ip, description, tag, icon, section, is_pinned)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        app.name,
                        app.url,
                        app.ip,
                        app.description,
                        app.tag,
                        app.icon,
                        app.section,
                        i64::from(app.pinned),
                    ],
                )?;
            }
            tx.commit()?;

            info!("Added {} example apps", EXAMPLE_APPS.len());
            Ok(EXAMPLE_APPS.len())
        })
        .await
    }

    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    migrate_section_column(conn)?;

    let mut ensure = conn.prepare(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO NOTHING",
    )?;
    for (key, value) in DEFAULT_SETTINGS {
        ensure.execute(params![key, value])?;
    }

    debug!("Database tables created/verified");
    Ok(())
}

// Databases created before sections existed lack the column.
fn migrate_section_column(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(apps)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !columns.iter().any(|c| c == "section") {
        info!("Adding section column to apps table");
        conn.execute_batch("ALTER TABLE apps ADD COLUMN section TEXT")?;
    }
    Ok(())
}

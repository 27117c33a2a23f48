// src/store/uploads.rs
use super::error::{Result, StoreError};
use super::SqliteStore;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

const UPLOAD_COLUMNS: &str = "id, filename, original_name, size, mime, created_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upload {
    pub id: i64,
    pub filename: String,
    pub original_name: Option<String>,
    pub size: Option<i64>,
    pub mime: Option<String>,
    pub created_at: Option<String>,
}

impl Upload {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            original_name: row.get(2)?,
            size: row.get(3)?,
            mime: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Public path under which the file is served.
    pub fn public_path(&self) -> String {
        format!("/uploads/{}", self.filename)
    }
}

/// Metadata of a file already written to the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    pub filename: String,
    pub original_name: Option<String>,
    pub size: i64,
    pub mime: String,
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn insert_upload(&self, upload: NewUpload) -> Result<Upload>;

    /// Newest first.
    async fn list_uploads(&self, limit: i64, offset: i64) -> Result<Vec<Upload>>;

    async fn get_upload(&self, id: i64) -> Result<Option<Upload>>;
}

fn fetch_upload(conn: &Connection, id: i64) -> Result<Option<Upload>> {
    let sql = format!("SELECT {} FROM uploads WHERE id = ?1", UPLOAD_COLUMNS);
    Ok(conn.query_row(&sql, params![id], Upload::from_row).optional()?)
}

#[async_trait]
impl UploadStore for SqliteStore {
    async fn insert_upload(&self, upload: NewUpload) -> Result<Upload> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO uploads (filename, original_name, size, mime) VALUES (?1, ?2, ?3, ?4)",
                params![upload.filename, upload.original_name, upload.size, upload.mime],
            )?;
            let id = conn.last_insert_rowid();
            fetch_upload(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("upload {}", id)))
        })
        .await
    }

    async fn list_uploads(&self, limit: i64, offset: i64) -> Result<Vec<Upload>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM uploads ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                UPLOAD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let uploads = stmt
                .query_map(params![limit, offset], Upload::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(uploads)
        })
        .await
    }

    async fn get_upload(&self, id: i64) -> Result<Option<Upload>> {
        self.with_conn(move |conn| fetch_upload(conn, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> NewUpload {
        NewUpload {
            filename: name.to_string(),
            original_name: Some("Logo.PNG".to_string()),
            size: 2048,
            mime: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = SqliteStore::open_memory().unwrap();
        let stored = store.insert_upload(upload("1700000000000-00ff.png")).await.unwrap();

        assert_eq!(stored.size, Some(2048));
        assert_eq!(stored.public_path(), "/uploads/1700000000000-00ff.png");
        assert_eq!(store.get_upload(stored.id).await.unwrap(), Some(stored));
        assert_eq!(store.get_upload(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paged() {
        let store = SqliteStore::open_memory().unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            store.insert_upload(upload(name)).await.unwrap();
        }

        let names: Vec<_> = store
            .list_uploads(50, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.filename)
            .collect();
        assert_eq!(names, vec!["c.png", "b.png", "a.png"]);

        let page = store.list_uploads(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].filename, "b.png");
    }
}

// src/uploads/storage.rs
// Icon uploads: multipart bodies are streamed straight to the uploads
// directory under generated names.
use crate::store::NewUpload;
use chrono::Utc;
use hyper::Body;
use multer::{Constraints, Field, Multipart, SizeLimit};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const ALLOWED_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/svg+xml",
];

pub const MAX_FILES: usize = 10;

// Room for form overhead and small text fields around the files.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid file type. Only PNG, JPEG, WebP, and SVG images are allowed.")]
    InvalidType,

    #[error("File too large. Maximum size is {} MB.", .0 / (1024 * 1024))]
    TooLarge(u64),

    #[error("Too many files. Maximum is {0}.")]
    TooManyFiles(usize),

    #[error("Unexpected field")]
    UnexpectedField,

    #[error("Invalid multipart body: {0}")]
    Malformed(String),

    #[error("Failed to store file: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Everything except local disk failures is the client's fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub original_name: Option<String>,
    pub size: u64,
    pub mime: String,
}

impl From<StoredFile> for NewUpload {
    fn from(file: StoredFile) -> Self {
        NewUpload {
            filename: file.filename,
            original_name: file.original_name,
            size: file.size as i64,
            mime: file.mime,
        }
    }
}

/// `<unix millis>-<16 hex chars><.ext>`, extension lower-cased from the
/// client's name and dropped when it is not purely alphanumeric.
pub fn generate_filename(original: Option<&str>) -> String {
    let random: String = rand::random::<[u8; 8]>()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!("{}-{}{}", Utc::now().timestamp_millis(), random, ext)
}

/// Only names this module could have generated are served.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    max_file_bytes: u64,
}

impl FileStorage {
    /// Creates the directory when missing.
    pub fn new(dir: impl Into<PathBuf>, max_file_bytes: u64) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_file_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stores every file part named `field_name`. Text parts are ignored.
    /// On any error the files already written by this call are removed.
    pub async fn receive(
        &self,
        body: Body,
        content_type: Option<&str>,
        field_name: &str,
        max_files: usize,
    ) -> Result<Vec<StoredFile>, UploadError> {
        let content_type = content_type
            .ok_or_else(|| UploadError::Malformed("missing Content-Type".to_string()))?;
        let boundary =
            multer::parse_boundary(content_type).map_err(|e| UploadError::Malformed(e.to_string()))?;

        let limit = self.max_file_bytes * max_files as u64 + MULTIPART_OVERHEAD_BYTES;
        let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(limit));
        let mut multipart = Multipart::with_constraints(body, boundary, constraints);

        let mut stored = Vec::new();
        if let Err(e) = self
            .receive_fields(&mut multipart, field_name, max_files, &mut stored)
            .await
        {
            for file in &stored {
                self.remove(&file.filename).await;
            }
            return Err(e);
        }

        Ok(stored)
    }

    async fn receive_fields(
        &self,
        multipart: &mut Multipart<'static>,
        field_name: &str,
        max_files: usize,
        stored: &mut Vec<StoredFile>,
    ) -> Result<(), UploadError> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| self.multipart_error(e))?
        {
            let Some(original) = field.file_name().map(str::to_owned) else {
                continue;
            };
            if field.name() != Some(field_name) {
                return Err(UploadError::UnexpectedField);
            }
            if stored.len() >= max_files {
                return Err(UploadError::TooManyFiles(max_files));
            }

            let mime = field
                .content_type()
                .map(|m| m.essence_str().to_ascii_lowercase())
                .unwrap_or_default();
            if !ALLOWED_MIMES.contains(&mime.as_str()) {
                return Err(UploadError::InvalidType);
            }

            let file = self.write_field(field, original, mime).await?;
            stored.push(file);
        }
        Ok(())
    }

    async fn write_field(
        &self,
        mut field: Field<'static>,
        original: String,
        mime: String,
    ) -> Result<StoredFile, UploadError> {
        let filename = generate_filename(Some(&original));
        let path = self.dir.join(&filename);
        let mut file = tokio::fs::File::create(&path).await?;

        let size = match self.copy_field(&mut field, &mut file).await {
            Ok(size) => size,
            Err(e) => {
                drop(file);
                self.remove(&filename).await;
                return Err(e);
            }
        };

        debug!("Stored upload {} ({} bytes, {})", filename, size, mime);
        Ok(StoredFile {
            filename,
            original_name: Some(original),
            size,
            mime,
        })
    }

    async fn copy_field(
        &self,
        field: &mut Field<'static>,
        file: &mut tokio::fs::File,
    ) -> Result<u64, UploadError> {
        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(|e| self.multipart_error(e))? {
            size += chunk.len() as u64;
            if size > self.max_file_bytes {
                return Err(UploadError::TooLarge(self.max_file_bytes));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(size)
    }

    /// Best effort; a leftover file is only logged.
    pub async fn remove(&self, filename: &str) {
        if let Err(e) = tokio::fs::remove_file(self.dir.join(filename)).await {
            warn!("Failed to remove upload {}: {}", filename, e);
        }
    }

    /// Returns `None` for unsafe names and missing files.
    pub async fn read(&self, filename: &str) -> std::io::Result<Option<Vec<u8>>> {
        if !is_safe_filename(filename) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(filename)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn multipart_error(&self, err: multer::Error) -> UploadError {
        match err {
            multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
                UploadError::TooLarge(self.max_file_bytes)
            }
            other => UploadError::Malformed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "tabloo-boundary";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    fn part(field: &str, filename: Option<&str>, mime: &str, data: &[u8]) -> Vec<u8> {
        let disposition = match filename {
            Some(name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", field),
        };
        let mut out = format!("--{}\r\n{}Content-Type: {}\r\n\r\n", BOUNDARY, disposition, mime)
            .into_bytes();
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn body(parts: Vec<Vec<u8>>) -> Body {
        let mut out: Vec<u8> = parts.concat();
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        Body::from(out)
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_generated_names() {
        let name = generate_filename(Some("My Logo.PNG"));
        let (millis, rest) = name.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(rest.len(), 16 + ".png".len());
        assert!(rest.ends_with(".png"));
        assert!(is_safe_filename(&name));

        assert!(!generate_filename(Some("noext")).contains('.'));
        assert!(!generate_filename(Some("evil.p/ng")).ends_with("ng"));
        assert_ne!(generate_filename(None), generate_filename(None));
    }

    #[test]
    fn test_safe_names_and_types() {
        assert!(!is_safe_filename("../db/app.db"));
        assert!(!is_safe_filename(".hidden"));
        assert!(!is_safe_filename(""));
        assert_eq!(content_type_for("a.SVG"), "image/svg+xml");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.txt"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_receive_stores_allowed_images() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), 1024).unwrap();

        let files = storage
            .receive(
                body(vec![
                    part("caption", None, "text/plain", b"hello"),
                    part("files", Some("a.png"), "image/png", b"\x89PNG"),
                    part("files", Some("b.svg"), "image/svg+xml", b"<svg/>"),
                ]),
                Some(&content_type()),
                "files",
                MAX_FILES,
            )
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].mime, "image/png");
        assert_eq!(files[0].size, 4);
        assert_eq!(files[1].original_name.as_deref(), Some("b.svg"));
        assert_eq!(
            storage.read(&files[1].filename).await.unwrap(),
            Some(b"<svg/>".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rejects_disallowed_type_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), 1024).unwrap();

        let err = storage
            .receive(
                body(vec![
                    part("files", Some("ok.png"), "image/png", b"png"),
                    part("files", Some("run.exe"), "application/octet-stream", b"MZ"),
                ]),
                Some(&content_type()),
                "files",
                MAX_FILES,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::InvalidType));
        assert!(err.is_client_error());
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), 1024 * 1024).unwrap();
        let big = vec![0u8; 1024 * 1024 + 1];

        let err = storage
            .receive(
                body(vec![part("file", Some("big.png"), "image/png", &big)]),
                Some(&content_type()),
                "file",
                1,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TooLarge(_)));
        assert_eq!(err.to_string(), "File too large. Maximum size is 1 MB.");
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_field_and_count_limits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), 1024).unwrap();

        let err = storage
            .receive(
                body(vec![part("avatar", Some("a.png"), "image/png", b"x")]),
                Some(&content_type()),
                "file",
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnexpectedField));

        let err = storage
            .receive(
                body(vec![
                    part("file", Some("a.png"), "image/png", b"x"),
                    part("file", Some("b.png"), "image/png", b"y"),
                ]),
                Some(&content_type()),
                "file",
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooManyFiles(1)));
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_requires_multipart_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), 1024).unwrap();

        let err = storage
            .receive(Body::from("{}"), Some("application/json"), "file", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)));

        let err = storage.receive(Body::empty(), None, "file", 1).await.unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)));
    }
}

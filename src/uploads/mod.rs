// src/uploads/mod.rs
mod storage;

pub use storage::{
    content_type_for, generate_filename, is_safe_filename, FileStorage, StoredFile, UploadError,
    ALLOWED_MIMES, MAX_FILES,
};

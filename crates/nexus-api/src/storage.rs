//! # Uploaded File Storage
//!
//! Files uploaded from the mobile app are written to
//! `<storage_root>/audit_files/<file name>` and served back by name.
//! Names are reduced to a single path component before use.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Sub-directory for audit evidence files.
pub const AUDIT_FILES_DIR: &str = "audit_files";

const MAX_NAME_LEN: usize = 255;

/// Errors from the file store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The file name is empty, a path, or otherwise unusable.
    #[error("invalid file name \"{0}\"")]
    InvalidName(String),

    /// No file with that name exists.
    #[error("file \"{0}\" not found")]
    NotFound(String),

    /// Filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Sanitized name the file is served under.
    pub file_name: String,
    /// Path relative to the storage root, e.g. `audit_files/photo.jpg`.
    pub relative_path: String,
    pub size: usize,
}

/// Local-disk file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn audit_dir(&self) -> PathBuf {
        self.root.join(AUDIT_FILES_DIR)
    }

    /// Write `bytes` as an audit file, replacing any file of the same name.
    pub async fn put_audit_file(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let file_name = sanitize_file_name(name)?;
        let dir = self.audit_dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), bytes).await?;
        tracing::debug!(file = %file_name, size = bytes.len(), "stored audit file");
        Ok(StoredFile {
            relative_path: format!("{AUDIT_FILES_DIR}/{file_name}"),
            file_name,
            size: bytes.len(),
        })
    }

    /// Read an audit file by name.
    pub async fn get_audit_file(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let file_name = sanitize_file_name(name)?;
        match tokio::fs::read(self.audit_dir().join(&file_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(file_name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the storage root exists and is a directory.
    pub async fn is_available(&self) -> bool {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => tokio::fs::create_dir_all(&self.root).await.is_ok(),
        }
    }
}

/// Reduce a client-supplied name to a safe single path component.
///
/// Rejects names containing path separators, `..`, NUL, or leading dots,
/// and names that are empty or longer than 255 bytes.
pub fn sanitize_file_name(name: &str) -> Result<String, StorageError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed.len() > MAX_NAME_LEN
        || trimmed.starts_with('.')
        || trimmed.contains("..")
        || trimmed
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control());
    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// MIME type for a stored file, from its extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

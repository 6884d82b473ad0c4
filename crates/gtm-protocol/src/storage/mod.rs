//! Object storage used for test binaries and reports.
//!
//! The orchestrator and the agent each construct one store at startup and
//! share it by reference for the lifetime of the run.

mod fs;
mod http;

pub use self::fs::FsObjectStore;
pub use self::http::{HttpObjectStore, DEFAULT_STORAGE_ENDPOINT};

use std::io;
use std::path::Path;

use crate::url::{GcsUrl, UrlError};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(GcsUrl),

    #[error("invalid object URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Http(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A bucket/object store.
pub trait ObjectStore: Send + Sync {
    /// Read a whole object.
    fn download(&self, url: &GcsUrl) -> StorageResult<Vec<u8>>;

    /// Create or replace an object.
    fn upload(&self, url: &GcsUrl, data: &[u8]) -> StorageResult<()>;

    /// Read an object into a local file, returning the number of bytes written.
    /// The file is closed before this returns.
    fn download_to_file(&self, url: &GcsUrl, path: &Path) -> StorageResult<u64> {
        let data = self.download(url)?;
        std::fs::write(path, &data)?;
        Ok(data.len() as u64)
    }
}

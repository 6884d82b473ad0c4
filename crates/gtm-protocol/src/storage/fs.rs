//! Filesystem-backed object store.
//!
//! Objects live at `<root>/<bucket>/<object>`. Useful with a bucket mounted
//! through a FUSE adapter, and as the in-process store for tests.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ObjectStore, StorageError, StorageResult};
use crate::url::GcsUrl;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path backing an object.
    pub fn object_path(&self, url: &GcsUrl) -> StorageResult<PathBuf> {
        let object = url.require_object()?;
        let relative = Path::new(object);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("object path escapes bucket: {}", url),
            )));
        }
        Ok(self.root.join(url.bucket()).join(relative))
    }
}

impl ObjectStore for FsObjectStore {
    fn download(&self, url: &GcsUrl) -> StorageResult<Vec<u8>> {
        let path = self.object_path(url)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(url.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn upload(&self, url: &GcsUrl, data: &[u8]) -> StorageResult<()> {
        let path = self.object_path(url)?;
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "object has no parent"))?;
        fs::create_dir_all(parent)?;

        // Write-to-temp-then-rename so readers never observe a partial object.
        let temp_path = parent.join(format!(
            ".upload.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, data)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        tracing::debug!(object = %url, bytes = data.len(), "uploaded object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(s: &str) -> GcsUrl {
        s.parse().unwrap()
    }

    #[test]
    fn test_upload_then_download() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.upload(&url("gs://bkt/a/b/report.xml"), b"<xml/>").unwrap();

        assert_eq!(store.download(&url("gs://bkt/a/b/report.xml")).unwrap(), b"<xml/>");
        assert!(dir.path().join("bkt/a/b/report.xml").exists());
    }

    #[test]
    fn test_upload_replaces_existing_object() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let target = url("gs://bkt/obj");

        store.upload(&target, b"first").unwrap();
        store.upload(&target, b"second").unwrap();

        assert_eq!(store.download(&target).unwrap(), b"second");
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store.download(&url("gs://bkt/missing")).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.to_string().contains("gs://bkt/missing"));
    }

    #[test]
    fn test_bucket_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store.download(&url("gs://bkt")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));
    }

    #[test]
    fn test_parent_components_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store.upload(&url("gs://bkt/../escape"), b"x").unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_download_to_file() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().join("store"));
        store.upload(&url("gs://bkt/bin/suite.test"), b"#!/bin/sh\n").unwrap();

        let local = dir.path().join("suite.test");
        let written = store
            .download_to_file(&url("gs://bkt/bin/suite.test"), &local)
            .unwrap();

        assert_eq!(written, 10);
        assert_eq!(fs::read(&local).unwrap(), b"#!/bin/sh\n");
    }
}

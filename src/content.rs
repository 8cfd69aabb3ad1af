//! Content store: opaque-handle blobs, namespaced by owner.
//!
//! Handles are fresh random identifiers, never content hashes, so two files
//! with identical bytes occupy two blobs. Blobs are written once and never
//! overwritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DriveError, Result};
use crate::schema::OwnerId;

/// Generate a fresh content handle.
pub fn new_handle() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Capability interface over blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Write a new blob and return its stored size. Fails with `BlobExists`
    /// if the handle is taken.
    async fn put(&self, owner: OwnerId, handle: &str, bytes: &[u8]) -> Result<u64>;

    async fn size_of(&self, owner: OwnerId, handle: &str) -> Result<u64>;

    async fn get(&self, owner: OwnerId, handle: &str) -> Result<Vec<u8>>;

    async fn delete(&self, owner: OwnerId, handle: &str) -> Result<()>;
}

/// [`ContentStore`] keeping one file per blob under `<root>/<owner>/<handle>`.
#[derive(Debug, Clone)]
pub struct DiskContentStore {
    root: PathBuf,
}

impl DiskContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, owner: OwnerId, handle: &str) -> Result<PathBuf> {
        // Handles come from `new_handle`; anything else must not escape the root.
        if handle.is_empty() || !handle.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DriveError::NotFound(format!("content handle {handle:?}")));
        }
        Ok(self.root.join(owner.to_string()).join(handle))
    }
}

fn map_missing(err: std::io::Error, owner: OwnerId, handle: &str) -> DriveError {
    if err.kind() == ErrorKind::NotFound {
        DriveError::NotFound(format!("blob {owner}/{handle}"))
    } else {
        DriveError::Io(err)
    }
}

#[async_trait]
impl ContentStore for DiskContentStore {
    async fn put(&self, owner: OwnerId, handle: &str, bytes: &[u8]) -> Result<u64> {
        let path = self.blob_path(owner, handle)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    DriveError::BlobExists(format!("{owner}/{handle}"))
                } else {
                    DriveError::Io(e)
                }
            })?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        debug!(owner, handle, len = bytes.len(), "blob written");
        self.size_of(owner, handle).await
    }

    async fn size_of(&self, owner: OwnerId, handle: &str) -> Result<u64> {
        let path = self.blob_path(owner, handle)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| map_missing(e, owner, handle))?;
        Ok(meta.len())
    }

    async fn get(&self, owner: OwnerId, handle: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(owner, handle)?;
        debug!(owner, handle, "reading blob");
        fs::read(&path).await.map_err(|e| map_missing(e, owner, handle))
    }

    async fn delete(&self, owner: OwnerId, handle: &str) -> Result<()> {
        let path = self.blob_path(owner, handle)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| map_missing(e, owner, handle))?;
        debug!(owner, handle, "blob deleted");
        Ok(())
    }
}

//! Filesystem orchestrator.
//!
//! Composes a [`MetadataIndex`] and a [`ContentStore`] into the user-facing
//! file and directory operations. Holds no state of its own; concurrency
//! safety belongs to the two stores.
//!
//! Every creation or removal under a directory is paired with exactly one
//! count adjustment of that directory, including the root.

use std::sync::Arc;

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::{ContentStore, new_handle};
use crate::error::{DriveError, Result};
use crate::metadata::MetadataIndex;
use crate::path::{self, NO_PARENT, ROOT_NAME, child_path, is_within, parent_of};
use crate::schema::{Node, NodeKind, OwnerId};

/// A subdirectory as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Full display path, e.g. `/docs`.
    pub path: String,
    pub item_count: i64,
}

/// A file as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: i64,
}

/// Both listings of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsList {
    pub directories: Vec<DirectoryEntry>,
    pub files: Vec<FileEntry>,
}

#[derive(Clone)]
pub struct FileSystem {
    metadata: Arc<dyn MetadataIndex>,
    content: Arc<dyn ContentStore>,
}

impl FileSystem {
    pub fn new(metadata: Arc<dyn MetadataIndex>, content: Arc<dyn ContentStore>) -> Self {
        Self { metadata, content }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataIndex> {
        &self.metadata
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    /// Create an owner's root directory. Called once at registration.
    pub async fn create_root(&self, owner: OwnerId) -> Result<()> {
        self.metadata
            .create_node(&Node::directory(owner, NO_PARENT, ROOT_NAME))
            .await?;
        debug!(owner, "root directory created");
        Ok(())
    }

    /// Create the root unless it already exists. Repairs an account whose
    /// registration stopped before its root was written.
    pub async fn ensure_root(&self, owner: OwnerId) -> Result<()> {
        match self.create_root(owner).await {
            Ok(()) | Err(DriveError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Item count of the directory whose children carry `dir_path`.
    pub async fn item_count(&self, owner: OwnerId, dir_path: &str) -> Result<i64> {
        let dir_path = path::normalize(dir_path)?;
        let (path, name) = parent_of(&dir_path)
            .ok_or_else(|| DriveError::InvalidPath("the root has no parent".into()))?;
        self.metadata
            .get_node(owner, &path, &name, NodeKind::Directory)
            .await?
            .map(|dir| dir.size)
            .ok_or(DriveError::NotFound(dir_path))
    }

    /// Fails unless a file named `name` could be created under `path` right
    /// now. Advisory only: `create_file` re-checks through the insert.
    pub async fn ensure_can_create_file(&self, owner: OwnerId, path: &str, name: &str) -> Result<()> {
        let (path, name) = locate(path, name)?;
        self.ensure_directory(owner, &path).await?;
        self.ensure_name_free(owner, &path, &name).await
    }

    pub async fn create_file(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<u64> {
        let (path, name) = locate(path, name)?;
        self.ensure_directory(owner, &path).await?;
        self.ensure_name_free(owner, &path, &name).await?;

        let handle = new_handle();
        // Size comes from the stored blob, not from the caller's byte count.
        let size = self.content.put(owner, &handle, bytes).await?;

        let node = Node::file(owner, path.as_str(), name.as_str(), size as i64, handle.as_str());
        if let Err(err) = self.metadata.create_node(&node).await {
            if let Err(cleanup) = self.content.delete(owner, &handle).await {
                warn!(owner, %handle, error = %cleanup, "failed to remove blob of rejected file");
            }
            return Err(err);
        }

        self.bump_parent(owner, &path, 1).await?;
        debug!(owner, %path, %name, size, "file created");
        Ok(size)
    }

    pub async fn delete_file(&self, owner: OwnerId, path: &str, name: &str) -> Result<()> {
        let (path, name) = locate(path, name)?;
        let handle = self.metadata.get_content_handle(owner, &path, &name).await?;

        // The row removal decides which of several concurrent deletes wins.
        if !self
            .metadata
            .delete_node(owner, &path, &name, NodeKind::File)
            .await?
        {
            return Err(DriveError::NotFound(child_path(&path, &name)));
        }
        match self.content.delete(owner, &handle).await {
            Ok(()) => {}
            Err(DriveError::NotFound(_)) => {
                warn!(owner, %handle, "blob of deleted file was already gone");
            }
            Err(e) => return Err(e),
        }
        self.bump_parent(owner, &path, -1).await?;

        debug!(owner, %path, %name, "file deleted");
        Ok(())
    }

    pub async fn create_dir(&self, owner: OwnerId, path: &str, name: &str) -> Result<()> {
        let (path, name) = locate(path, name)?;
        self.ensure_directory(owner, &path).await?;

        self.metadata
            .create_node(&Node::directory(owner, path.as_str(), name.as_str()))
            .await?;
        self.bump_parent(owner, &path, 1).await?;

        debug!(owner, %path, %name, "directory created");
        Ok(())
    }

    /// Delete a directory and everything beneath it.
    ///
    /// The first failing descendant aborts the walk; whatever was removed
    /// before it stays removed. Descendants removed concurrently by another
    /// worker are skipped.
    #[async_recursion]
    pub async fn delete_dir(&self, owner: OwnerId, path: &str, name: &str) -> Result<()> {
        let (path, name) = locate(path, name)?;
        if !self
            .metadata
            .exists(owner, &path, &name, NodeKind::Directory)
            .await?
        {
            return Err(DriveError::NotFound(child_path(&path, &name)));
        }

        let inner = child_path(&path, &name);
        for file in self
            .metadata
            .list_children(owner, &inner, Some(NodeKind::File))
            .await?
        {
            skip_missing(self.delete_file(owner, &inner, &file.name).await)?;
        }
        for dir in self
            .metadata
            .list_children(owner, &inner, Some(NodeKind::Directory))
            .await?
        {
            skip_missing(self.delete_dir(owner, &inner, &dir.name).await)?;
        }

        if !self
            .metadata
            .delete_node(owner, &path, &name, NodeKind::Directory)
            .await?
        {
            return Err(DriveError::NotFound(child_path(&path, &name)));
        }
        self.bump_parent(owner, &path, -1).await?;

        debug!(owner, %path, %name, "directory deleted");
        Ok(())
    }

    pub async fn rename_file(
        &self,
        owner: OwnerId,
        path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.rename(owner, NodeKind::File, path, old_name, new_name)
            .await
    }

    /// Rename a directory; everything beneath it follows.
    pub async fn rename_dir(
        &self,
        owner: OwnerId,
        path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.rename(owner, NodeKind::Directory, path, old_name, new_name)
            .await
    }

    pub async fn move_file(
        &self,
        owner: OwnerId,
        old_path: &str,
        new_path: &str,
        name: &str,
    ) -> Result<()> {
        self.relocate(owner, NodeKind::File, old_path, new_path, name)
            .await
    }

    /// Move a directory under another parent; everything beneath it follows.
    pub async fn move_dir(
        &self,
        owner: OwnerId,
        old_path: &str,
        new_path: &str,
        name: &str,
    ) -> Result<()> {
        self.relocate(owner, NodeKind::Directory, old_path, new_path, name)
            .await
    }

    pub async fn get_file_contents(&self, owner: OwnerId, path: &str, name: &str) -> Result<Vec<u8>> {
        let (path, name) = locate(path, name)?;
        let handle = self.metadata.get_content_handle(owner, &path, &name).await?;
        self.content.get(owner, &handle).await
    }

    /// Subdirectories directly under `path`. An unknown path lists as empty.
    pub async fn get_dirs_list(&self, owner: OwnerId, path: &str) -> Result<Vec<DirectoryEntry>> {
        let path = path::normalize(path)?;
        let dirs = self
            .metadata
            .list_children(owner, &path, Some(NodeKind::Directory))
            .await?;

        Ok(dirs
            .into_iter()
            .map(|dir| DirectoryEntry {
                path: child_path(&dir.path, &dir.name),
                item_count: dir.size,
            })
            .collect())
    }

    /// Files directly under `path`. An unknown path lists as empty.
    pub async fn get_files_list(&self, owner: OwnerId, path: &str) -> Result<Vec<FileEntry>> {
        let path = path::normalize(path)?;
        let files = self
            .metadata
            .list_children(owner, &path, Some(NodeKind::File))
            .await?;

        Ok(files
            .into_iter()
            .map(|file| FileEntry {
                name: file.name,
                size: file.size,
            })
            .collect())
    }

    pub async fn list_items(&self, owner: OwnerId, path: &str) -> Result<ItemsList> {
        Ok(ItemsList {
            directories: self.get_dirs_list(owner, path).await?,
            files: self.get_files_list(owner, path).await?,
        })
    }

    async fn rename(
        &self,
        owner: OwnerId,
        kind: NodeKind,
        path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        let (path, old_name) = locate(path, old_name)?;
        path::validate_name(new_name)?;
        if old_name == new_name {
            return Err(DriveError::Conflict(child_path(&path, new_name)));
        }
        if !self.metadata.exists(owner, &path, &old_name, kind).await? {
            return Err(DriveError::NotFound(child_path(&path, &old_name)));
        }

        self.metadata
            .rename_move(owner, kind, &path, &old_name, &path, new_name)
            .await?;
        debug!(owner, ?kind, %path, %old_name, %new_name, "renamed");
        Ok(())
    }

    async fn relocate(
        &self,
        owner: OwnerId,
        kind: NodeKind,
        old_path: &str,
        new_path: &str,
        name: &str,
    ) -> Result<()> {
        let (old_path, name) = locate(old_path, name)?;
        let (new_path, _) = locate(new_path, &name)?;
        if old_path == new_path {
            return Err(DriveError::Conflict(child_path(&new_path, &name)));
        }
        if kind.is_directory() && is_within(&new_path, &child_path(&old_path, &name)) {
            return Err(DriveError::InvalidPath(format!(
                "cannot move {} into itself",
                child_path(&old_path, &name)
            )));
        }
        if !self.metadata.exists(owner, &old_path, &name, kind).await? {
            return Err(DriveError::NotFound(child_path(&old_path, &name)));
        }
        self.ensure_directory(owner, &new_path).await?;

        self.metadata
            .rename_move(owner, kind, &old_path, &name, &new_path, &name)
            .await?;
        self.bump_parent(owner, &old_path, -1).await?;
        self.bump_parent(owner, &new_path, 1).await?;

        debug!(owner, ?kind, %old_path, %new_path, %name, "moved");
        Ok(())
    }

    /// Fails with `NotFound` unless the directory whose children carry `path`
    /// exists.
    async fn ensure_directory(&self, owner: OwnerId, path: &str) -> Result<()> {
        let (parent, name) = parent_of(path)
            .ok_or_else(|| DriveError::InvalidPath("the root has no parent".into()))?;
        if self
            .metadata
            .exists(owner, &parent, &name, NodeKind::Directory)
            .await?
        {
            Ok(())
        } else {
            Err(DriveError::NotFound(path.to_string()))
        }
    }

    async fn ensure_name_free(&self, owner: OwnerId, path: &str, name: &str) -> Result<()> {
        for kind in [NodeKind::File, NodeKind::Directory] {
            if self.metadata.exists(owner, path, name, kind).await? {
                return Err(DriveError::Conflict(child_path(path, name)));
            }
        }
        Ok(())
    }

    async fn bump_parent(&self, owner: OwnerId, path: &str, delta: i64) -> Result<()> {
        let (parent, name) = parent_of(path)
            .ok_or_else(|| DriveError::InvalidPath("the root has no parent".into()))?;
        self.metadata.adjust_count(owner, &parent, &name, delta).await
    }
}

/// A descendant that vanished mid-walk was removed, and counted, elsewhere.
fn skip_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(DriveError::NotFound(_)) => Ok(()),
        other => other,
    }
}

/// Normalise a (parent path, name) pair addressing a non-root node.
fn locate(path: &str, name: &str) -> Result<(String, String)> {
    let path = path::normalize(path)?;
    if path == NO_PARENT {
        return Err(DriveError::InvalidPath("only the root lives outside /".into()));
    }
    path::validate_name(name)?;
    Ok((path, name.to_string()))
}

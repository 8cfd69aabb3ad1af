//! Metadata index: owner-scoped records of files and directories.
//!
//! The unique constraint on `(owner_id, path, name)` is the source of truth
//! for "already exists"; callers may probe with [`MetadataIndex::exists`] but
//! must treat a `Conflict` from an insert or rename as final.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DriveError, Result};
use crate::path::child_path;
use crate::schema::{Node, NodeKind, NodeRow, OwnerId};

/// Capability interface over the node table.
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Insert a node. Fails with `Conflict` if a sibling already uses the name.
    async fn create_node(&self, node: &Node) -> Result<()>;

    /// Remove the matching node. Returns whether a row was removed.
    async fn delete_node(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        kind: NodeKind,
    ) -> Result<bool>;

    async fn exists(&self, owner: OwnerId, path: &str, name: &str, kind: NodeKind)
    -> Result<bool>;

    async fn get_node(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        kind: NodeKind,
    ) -> Result<Option<Node>>;

    /// Content handle of a file. Fails with `NotFound` if there is no such file.
    async fn get_content_handle(&self, owner: OwnerId, path: &str, name: &str) -> Result<String>;

    /// Direct children carrying `path`, optionally filtered by kind.
    /// Directories come first, each group ordered by name.
    async fn list_children(
        &self,
        owner: OwnerId,
        path: &str,
        kind: Option<NodeKind>,
    ) -> Result<Vec<Node>>;

    /// Atomically add `delta` to a directory's item count.
    async fn adjust_count(&self, owner: OwnerId, path: &str, name: &str, delta: i64)
    -> Result<()>;

    /// Rewrite the path and name of one node in a single write.
    ///
    /// For directories, every descendant's recorded path is rewritten to the
    /// new location first, in the same transaction.
    async fn rename_move(
        &self,
        owner: OwnerId,
        kind: NodeKind,
        old_path: &str,
        old_name: &str,
        new_path: &str,
        new_name: &str,
    ) -> Result<()>;
}

/// [`MetadataIndex`] backed by the `nodes` table.
#[derive(Clone)]
pub struct SqliteMetadataIndex {
    pool: SqlitePool,
}

impl SqliteMetadataIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataIndex for SqliteMetadataIndex {
    async fn create_node(&self, node: &Node) -> Result<()> {
        sqlx::query(
            "INSERT INTO nodes (owner_id, path, name, is_directory, size, content_handle) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(node.owner_id)
        .bind(&node.path)
        .bind(&node.name)
        .bind(node.kind.is_directory())
        .bind(node.size)
        .bind(&node.content_handle)
        .execute(&self.pool)
        .await
        .map_err(|e| DriveError::from_insert(e, child_path(&node.path, &node.name)))?;

        debug!(owner = node.owner_id, path = %node.path, name = %node.name, kind = ?node.kind, "node created");
        Ok(())
    }

    async fn delete_node(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        kind: NodeKind,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM nodes WHERE owner_id = ?1 AND path = ?2 AND name = ?3 AND is_directory = ?4",
        )
        .bind(owner)
        .bind(path)
        .bind(name)
        .bind(kind.is_directory())
        .execute(&self.pool)
        .await?;

        debug!(owner, path, name, ?kind, removed = result.rows_affected(), "node deleted");
        Ok(result.rows_affected() > 0)
    }

    async fn exists(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        kind: NodeKind,
    ) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM nodes WHERE owner_id = ?1 AND path = ?2 AND name = ?3 AND is_directory = ?4 LIMIT 1",
        )
        .bind(owner)
        .bind(path)
        .bind(name)
        .bind(kind.is_directory())
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn get_node(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        kind: NodeKind,
    ) -> Result<Option<Node>> {
        let row: Option<NodeRow> = sqlx::query_as(
            "SELECT owner_id, path, name, is_directory, size, content_handle FROM nodes \
             WHERE owner_id = ?1 AND path = ?2 AND name = ?3 AND is_directory = ?4",
        )
        .bind(owner)
        .bind(path)
        .bind(name)
        .bind(kind.is_directory())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Node::from))
    }

    async fn get_content_handle(&self, owner: OwnerId, path: &str, name: &str) -> Result<String> {
        let handle: Option<Option<String>> = sqlx::query_scalar(
            "SELECT content_handle FROM nodes \
             WHERE owner_id = ?1 AND path = ?2 AND name = ?3 AND is_directory = 0",
        )
        .bind(owner)
        .bind(path)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        handle
            .flatten()
            .ok_or_else(|| DriveError::NotFound(child_path(path, name)))
    }

    async fn list_children(
        &self,
        owner: OwnerId,
        path: &str,
        kind: Option<NodeKind>,
    ) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = match kind {
            Some(kind) => {
                sqlx::query_as(
                    "SELECT owner_id, path, name, is_directory, size, content_handle FROM nodes \
                     WHERE owner_id = ?1 AND path = ?2 AND is_directory = ?3 ORDER BY name",
                )
                .bind(owner)
                .bind(path)
                .bind(kind.is_directory())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT owner_id, path, name, is_directory, size, content_handle FROM nodes \
                     WHERE owner_id = ?1 AND path = ?2 ORDER BY is_directory DESC, name",
                )
                .bind(owner)
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Node::from).collect())
    }

    async fn adjust_count(
        &self,
        owner: OwnerId,
        path: &str,
        name: &str,
        delta: i64,
    ) -> Result<()> {
        // Single statement so concurrent siblings never lose an update.
        let result = sqlx::query(
            "UPDATE nodes SET size = size + ?1 \
             WHERE owner_id = ?2 AND path = ?3 AND name = ?4 AND is_directory = 1",
        )
        .bind(delta)
        .bind(owner)
        .bind(path)
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DriveError::NotFound(child_path(path, name)));
        }
        Ok(())
    }

    async fn rename_move(
        &self,
        owner: OwnerId,
        kind: NodeKind,
        old_path: &str,
        old_name: &str,
        new_path: &str,
        new_name: &str,
    ) -> Result<()> {
        let target = child_path(new_path, new_name);
        let mut tx = self.pool.begin().await?;

        if kind.is_directory() {
            let old_prefix = child_path(old_path, old_name);
            let moved = sqlx::query(
                "UPDATE nodes SET path = ?1 || substr(path, length(?2) + 1) \
                 WHERE owner_id = ?3 AND (path = ?2 OR substr(path, 1, length(?2) + 1) = ?2 || '/')",
            )
            .bind(&target)
            .bind(&old_prefix)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| DriveError::from_insert(e, target.clone()))?;
            debug!(owner, from = %old_prefix, to = %target, descendants = moved.rows_affected(), "descendants relocated");
        }

        let result = sqlx::query(
            "UPDATE nodes SET path = ?1, name = ?2 \
             WHERE owner_id = ?3 AND path = ?4 AND name = ?5 AND is_directory = ?6",
        )
        .bind(new_path)
        .bind(new_name)
        .bind(owner)
        .bind(old_path)
        .bind(old_name)
        .bind(kind.is_directory())
        .execute(&mut *tx)
        .await
        .map_err(|e| DriveError::from_insert(e, target.clone()))?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back any descendant rewrite.
            return Err(DriveError::NotFound(child_path(old_path, old_name)));
        }

        tx.commit().await?;
        debug!(owner, ?kind, from = %child_path(old_path, old_name), to = %target, "node relocated");
        Ok(())
    }
}

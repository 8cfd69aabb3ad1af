//! Database schema and record types for the metadata index.
//!
//! Nodes use a (parent path, name, kind) design: a node records the path of
//! the directory holding it, never a live reference to that directory.

use serde::{Deserialize, Serialize};

/// SQLite DDL applied on every open.
pub const SQLITE_SCHEMA: &str = include_str!("../migrations/sqlite.sql");

/// Opaque numeric identifier of the user owning a namespace.
pub type OwnerId = i64;

/// Kind of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn is_directory(self) -> bool {
        self == NodeKind::Directory
    }

    pub(crate) fn from_flag(is_directory: bool) -> Self {
        if is_directory {
            NodeKind::Directory
        } else {
            NodeKind::File
        }
    }
}

/// A file or directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub owner_id: OwnerId,
    /// Path of the containing directory (empty for the root).
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    /// Byte length for files, direct child count for directories.
    pub size: i64,
    /// Present only for files.
    pub content_handle: Option<String>,
}

impl Node {
    pub fn file(
        owner_id: OwnerId,
        path: impl Into<String>,
        name: impl Into<String>,
        size: i64,
        content_handle: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            path: path.into(),
            name: name.into(),
            kind: NodeKind::File,
            size,
            content_handle: Some(content_handle.into()),
        }
    }

    pub fn directory(owner_id: OwnerId, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_id,
            path: path.into(),
            name: name.into(),
            kind: NodeKind::Directory,
            size: 0,
            content_handle: None,
        }
    }
}

/// Raw `nodes` row as read back by sqlx.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NodeRow {
    pub owner_id: i64,
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: i64,
    pub content_handle: Option<String>,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        Self {
            owner_id: row.owner_id,
            path: row.path,
            name: row.name,
            kind: NodeKind::from_flag(row.is_directory),
            size: row.size,
            content_handle: row.content_handle,
        }
    }
}

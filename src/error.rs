//! Error types for cryptdrive

use thiserror::Error;

/// Result type for cryptdrive operations
pub type Result<T> = std::result::Result<T, DriveError>;

/// Every failure the filesystem, token and protocol layers can surface.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation on create/rename/move. Raised by the storage
    /// layer's unique constraint, which is the authoritative signal.
    #[error("already exists: {0}")]
    Conflict(String),

    /// A freshly generated content handle was already occupied.
    #[error("content handle already in use: {0}")]
    BlobExists(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("invalid verb: {0}")]
    InvalidVerb(String),

    #[error("invalid credentials for {0}")]
    InvalidCredentials(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("transport fault: {0}")]
    Transport(String),

    #[error("frame exceeds {limit} bytes without a sentinel")]
    FrameTooLarge { limit: usize },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DriveError {
    /// True for faults that originate in storage or the host rather than in
    /// the client's request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            DriveError::BlobExists(_)
                | DriveError::Sqlx(_)
                | DriveError::Migration(_)
                | DriveError::Serialization(_)
                | DriveError::Jwt(_)
                | DriveError::Toml(_)
                | DriveError::Config(_)
                | DriveError::Io(_)
        )
    }

    /// True for faults that leave the connection's framing unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DriveError::Transport(_) | DriveError::FrameTooLarge { .. } | DriveError::Timeout(_)
        )
    }

    /// Maps a unique-constraint violation to `Conflict`, leaving every other
    /// database error as `Sqlx`.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DriveError::Conflict(what.into())
            }
            _ => DriveError::Sqlx(err),
        }
    }
}

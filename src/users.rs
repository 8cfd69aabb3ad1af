//! Account registry consulted by `SIGN_UP` and `LOG_IN`.
//!
//! Credentials arrive already hashed by the client; this layer only stores
//! and compares them.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DriveError, Result};
use crate::schema::OwnerId;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Register a new account. Fails with `UserExists` if the name is taken.
    async fn register(&self, username: &str, password_hash: &str) -> Result<OwnerId>;

    /// True when the account exists and the hash matches.
    async fn verify(&self, username: &str, password_hash: &str) -> Result<bool>;

    /// Resolve a username to its owner id. Fails with `NotFound`.
    async fn owner_id(&self, username: &str) -> Result<OwnerId>;
}

/// [`UserDirectory`] backed by the `users` table.
#[derive(Clone)]
pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn register(&self, username: &str, password_hash: &str) -> Result<OwnerId> {
        let result = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?1, ?2)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| match DriveError::from_insert(e, username) {
                DriveError::Conflict(name) => DriveError::UserExists(name),
                other => other,
            })?;

        let id = result.last_insert_rowid();
        debug!(username, owner = id, "user registered");
        Ok(id)
    }

    async fn verify(&self, username: &str, password_hash: &str) -> Result<bool> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE username = ?1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(stored.is_some_and(|hash| hash == password_hash))
    }

    async fn owner_id(&self, username: &str) -> Result<OwnerId> {
        sqlx::query_scalar::<_, OwnerId>("SELECT user_id FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DriveError::NotFound(format!("user {username}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqlBackend;

    #[tokio::test]
    async fn test_register_and_verify() {
        let db = SqlBackend::memory().await.unwrap();
        let users = SqliteUserDirectory::new(db.pool().clone());

        let alice = users.register("alice", "hash-a").await.unwrap();
        let bob = users.register("bob", "hash-b").await.unwrap();
        assert_ne!(alice, bob);

        assert!(users.verify("alice", "hash-a").await.unwrap());
        assert!(!users.verify("alice", "hash-b").await.unwrap());
        assert!(!users.verify("carol", "hash-a").await.unwrap());

        assert_eq!(users.owner_id("alice").await.unwrap(), alice);
        assert!(matches!(
            users.owner_id("carol").await,
            Err(DriveError::NotFound(_))
        ));

        assert!(matches!(
            users.register("alice", "other").await,
            Err(DriveError::UserExists(_))
        ));
    }
}

//! SQLite connection pool shared by the metadata index and the user table.
//!
//! Opens (or creates) the database, applies the schema and hands out cheap
//! clones of the pool to the stores built on top of it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::pool::PoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use tracing::debug;

use crate::error::{DriveError, Result};
use crate::schema::SQLITE_SCHEMA;

/// Configuration for the SQL backend
#[derive(Debug, Clone)]
pub enum SqlBackendConfig {
    /// SQLite database file, created if missing
    Sqlite { path: PathBuf, max_connections: u32 },

    /// Private in-memory database, used by tests
    Memory,
}

/// SQLite backend using SQLx
#[derive(Clone)]
pub struct SqlBackend {
    pool: SqlitePool,
}

impl SqlBackend {
    /// Open the backend and run migrations
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use cryptdrive::{SqlBackend, SqlBackendConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let db = SqlBackend::new(SqlBackendConfig::Memory).await?;
    ///     let pool = db.pool().clone();
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: SqlBackendConfig) -> Result<Self> {
        let pool = match config {
            SqlBackendConfig::Sqlite {
                path,
                max_connections,
            } => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let opts = SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    // Concurrent workers otherwise see transient "database is locked".
                    .busy_timeout(Duration::from_secs(5));

                debug!(path = %path.display(), "opening metadata database");
                PoolOptions::new()
                    .max_connections(max_connections.max(1))
                    .connect_with(opts)
                    .await
                    .map_err(|e| DriveError::Config(format!("open {}: {e}", path.display())))?
            }
            SqlBackendConfig::Memory => {
                // Each in-memory connection is its own database, so the pool
                // holds exactly one connection and never recycles it.
                let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
                PoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(opts)
                    .await?
            }
        };

        let backend = Self { pool };
        backend.migrate().await?;

        Ok(backend)
    }

    /// Convenience constructor for an in-memory database
    pub async fn memory() -> Result<Self> {
        Self::new(SqlBackendConfig::Memory).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DriveError::Migration(format!("Failed to acquire connection: {e}")))?;

        // sqlx executes one statement per query, so split the script.
        for (idx, statement) in SQLITE_SCHEMA.split(';').enumerate() {
            let statement: String = statement
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with("--")
                })
                .collect::<Vec<_>>()
                .join("\n");

            if statement.trim().is_empty() {
                continue;
            }

            sqlx::query(&statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    DriveError::Migration(format!("statement #{idx} failed: {e}"))
                })?;
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

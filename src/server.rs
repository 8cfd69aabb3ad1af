//! TCP front end: accept loop and bounded worker pool.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backend::{SqlBackend, SqlBackendConfig};
use crate::config::{DriveConfig, ServerConfig};
use crate::content::DiskContentStore;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::metadata::SqliteMetadataIndex;
use crate::session::serve_connection;
use crate::token::TokenAuthority;
use crate::users::{SqliteUserDirectory, UserDirectory};

/// Everything a session needs, shared by all connections.
pub struct DriveServices {
    pub fs: FileSystem,
    pub tokens: TokenAuthority,
    pub users: Arc<dyn UserDirectory>,
}

impl DriveServices {
    pub fn new(fs: FileSystem, tokens: TokenAuthority, users: Arc<dyn UserDirectory>) -> Self {
        Self { fs, tokens, users }
    }

    /// Open the on-disk stores named by `config`.
    pub async fn open(config: &DriveConfig) -> Result<Self> {
        let storage = &config.storage;
        let db = SqlBackend::new(SqlBackendConfig::Sqlite {
            path: storage.database_path(),
            max_connections: storage.max_connections,
        })
        .await?;
        let blobs = storage.blob_dir();
        tokio::fs::create_dir_all(&blobs).await?;

        info!(
            database = %storage.database_path().display(),
            blobs = %blobs.display(),
            "storage opened"
        );
        let tokens = TokenAuthority::from_config(&config.tokens)?;
        Ok(Self::from_backend(&db, DiskContentStore::new(blobs), tokens))
    }

    /// In-memory metadata with blobs under `blob_dir`.
    pub async fn in_memory(blob_dir: impl AsRef<Path>, tokens: TokenAuthority) -> Result<Self> {
        let db = SqlBackend::memory().await?;
        Ok(Self::from_backend(
            &db,
            DiskContentStore::new(blob_dir.as_ref()),
            tokens,
        ))
    }

    fn from_backend(db: &SqlBackend, content: DiskContentStore, tokens: TokenAuthority) -> Self {
        let fs = FileSystem::new(
            Arc::new(SqliteMetadataIndex::new(db.pool().clone())),
            Arc::new(content),
        );
        let users = Arc::new(SqliteUserDirectory::new(db.pool().clone()));
        Self::new(fs, tokens, users)
    }
}

pub struct Server {
    listener: TcpListener,
    services: Arc<DriveServices>,
    config: Arc<ServerConfig>,
    workers: Arc<Semaphore>,
}

impl Server {
    pub async fn bind(config: ServerConfig, services: Arc<DriveServices>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let workers = config.worker_count();
        info!(addr = %listener.local_addr()?, workers, "listening");

        Ok(Self {
            listener,
            services,
            workers: Arc::new(Semaphore::new(workers)),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve connections until `shutdown` resolves. Connections already
    /// handed to a worker run to completion on their own.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            // A connection is only accepted once a worker is free.
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let services = Arc::clone(&self.services);
            let config = Arc::clone(&self.config);
            tokio::spawn(
                async move {
                    let _permit = permit;
                    debug!("client connected");
                    match serve_connection(stream, services, &config).await {
                        Ok(()) => debug!("client disconnected"),
                        Err(e) => warn!(error = %e, "connection dropped"),
                    }
                }
                .instrument(info_span!("conn", %peer)),
            );
        }

        info!("server stopped accepting connections");
        Ok(())
    }
}

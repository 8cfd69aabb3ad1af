//! # CryptDrive - per-user remote file storage over a framed TCP protocol
//!
//! A server keeps a hierarchical namespace of files and directories for each
//! registered user. Metadata lives in SQLite (via SQLx); file content lives
//! in a separate blob store addressed by opaque handles. Clients speak a
//! text protocol of `|||`-separated fields terminated by `||| END |||`, and
//! authenticate with short-lived signed tokens that are refreshed in flight.
//!
//! ## Layers
//!
//! - **Storage**: [`SqlBackend`], [`metadata::SqliteMetadataIndex`],
//!   [`content::DiskContentStore`], [`users::SqliteUserDirectory`]
//! - **Filesystem**: [`FileSystem`] composes metadata and content
//! - **Protocol**: [`protocol`] messages, [`codec::SentinelCodec`] framing,
//!   [`session::Session`] state machine
//! - **Server**: [`Server`] accept loop over [`DriveServices`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cryptdrive::{DriveConfig, DriveServices, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DriveConfig::load("cryptdrive.toml")?;
//!     let services = Arc::new(DriveServices::open(&config).await?);
//!     Server::bind(config.server, services).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod content;
pub mod error;
pub mod fs;
pub mod metadata;
pub mod path;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod session;
pub mod token;
pub mod users;

pub use backend::{SqlBackend, SqlBackendConfig};
pub use config::DriveConfig;
pub use error::{DriveError, Result};
pub use fs::{DirectoryEntry, FileEntry, FileSystem, ItemsList};
pub use protocol::{Code, Request, Response, Status, Verb};
pub use server::{DriveServices, Server};
pub use token::TokenAuthority;

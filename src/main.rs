//! CryptDrive server binary
//!
//! ## Usage
//!
//! ```bash
//! cryptdrive                                # defaults
//! cryptdrive --config /etc/cryptdrive.toml
//! cryptdrive --bind 0.0.0.0:8081 --data-dir /srv/cryptdrive
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cryptdrive::{DriveConfig, DriveServices, Server};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cryptdrive", version, about = "Multi-user network file storage server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind_addr`
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Data directory, overriding `storage.data_dir`
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match DriveConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => DriveConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    run_server(config).await
}

async fn run_server(config: DriveConfig) -> ExitCode {
    tracing::info!("Starting cryptdrive on {}...", config.server.bind_addr);

    let services = match DriveServices::open(&config).await {
        Ok(services) => Arc::new(services),
        Err(e) => {
            tracing::error!("Failed to open storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(config.server, services).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    };

    if let Err(e) = server.run_until(shutdown).await {
        tracing::error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

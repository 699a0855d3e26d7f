//! Huddle Server Binary
//!
//! This is a thin wrapper around the server library that loads configuration,
//! sets up logging and runs the server until Ctrl-C.

use anyhow::Result;
use huddle_server::{Config, Server, ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let server_config = ServerConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&server_config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (certs, key) = server_config.load_certificates()?;
    let config = Config {
        bind: server_config.bind,
        certs,
        key,
        data_dir: Some(server_config.data_dir()?),
        settings: server_config.settings(),
    };

    let server = Arc::new(Server::new(config)?);
    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.close();
        }
    });

    server.run().await
}

//! ks-offline MCP server entry point.
//!
//! Boots the offline cache controller and serves it over stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use ks_offline_client::{FetchClient, FetchConfig, Host, Network, Registration};
use ks_offline_core::{AppConfig, CacheDb};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(scope = %config.scope, version = %config.cache_version, "Starting ks-offline server on stdio transport");

    let db = CacheDb::open(&config.db_path).await?;
    let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let registration = Registration::new(Host::new(config.scope_url()?, db, network)).with_skip_waiting(config.skip_waiting);

    if let Some(active) = registration.resume(config.version()?, config.manifest()).await? {
        tracing::info!(version = %active.version, "serving previously installed cache");
    }

    let handler = handler::McpOfflineServer::new(Arc::new(registration), config);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}

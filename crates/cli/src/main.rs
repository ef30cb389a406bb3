//! ks-offline command line entry point.
//!
//! Drives the offline cache controller from a shell: install a version,
//! fetch through it, inspect and delete stores. Logs go to stderr; command
//! output goes to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ks_offline_client::{FetchClient, FetchConfig, Host, Network, Registration};
use ks_offline_core::{AppConfig, CacheDb};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "ks-offline")]
#[command(about = "Versioned offline cache for a web application shell")]
#[command(version)]
struct Cli {
    /// Path to the cache database (overrides KS_OFFLINE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Scope URL the controller serves (overrides KS_OFFLINE_SCOPE)
    #[arg(long, global = true)]
    scope: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the asset manifest into a new cache version
    Install {
        /// Cache version to install (default: configured version)
        #[arg(long = "cache-version")]
        cache_version: Option<String>,

        /// Activate right away even when skip-waiting is off
        #[arg(long)]
        activate: bool,
    },
    /// Fetch a URL through the active cache version
    Fetch {
        url: String,

        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Return without waiting for the background cache write
        #[arg(long)]
        no_settle: bool,
    },
    /// List cache stores
    Stores,
    /// Delete a cache store
    Delete { version: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(scope) = cli.scope {
        config.scope = scope;
    }

    let db = CacheDb::open(&config.db_path).await?;
    let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let registration =
        Registration::new(Host::new(config.scope_url()?, db.clone(), network)).with_skip_waiting(config.skip_waiting);

    let mut out = std::io::stdout().lock();
    let result = match cli.command {
        Command::Install { cache_version, activate } => {
            commands::install(&registration, &config, cache_version, activate, &mut out).await
        }
        Command::Fetch { url, method, no_settle } => {
            commands::fetch(&registration, &config, &url, &method, !no_settle, &mut out).await
        }
        Command::Stores => commands::stores(&db, &mut out).await,
        Command::Delete { version } => commands::delete(&db, &version, &mut out).await,
    };

    drop(registration);
    db.close().await?;
    result
}

//! Subcommand implementations. Each writes its result to `out`.

use std::io::Write;

use anyhow::{Context, Result, bail};
use ks_offline_client::fetch::{Method, canonicalize};
use ks_offline_client::{FetchRequest, Registration};
use ks_offline_core::{AppConfig, CacheDb, CacheVersion};

/// Pick up the configured version if an earlier run installed it.
async fn resume_installed(registration: &Registration, config: &AppConfig) -> Result<bool> {
    if registration.status().await.active.is_some() {
        return Ok(true);
    }
    Ok(registration.resume(config.version()?, config.manifest()).await?.is_some())
}

pub async fn install(
    registration: &Registration, config: &AppConfig, cache_version: Option<String>, activate: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let version = match cache_version {
        Some(name) => CacheVersion::new(name)?,
        None => config.version()?,
    };
    resume_installed(registration, config).await?;

    let outcome = registration.register(version, config.manifest()).await?;
    writeln!(out, "installed {} ({} entries)", outcome.controller.version, outcome.entries)?;

    let activated = match outcome.activated {
        Some(activated) => Some(activated),
        None if activate => Some(registration.activate_waiting().await?),
        None => None,
    };
    match activated {
        Some(activated) => {
            writeln!(out, "activated {}", outcome.controller.version)?;
            for store in activated.purged {
                writeln!(out, "purged {store}")?;
            }
        }
        None => writeln!(out, "waiting; run again with --activate to take over")?,
    }
    Ok(())
}

pub async fn fetch(
    registration: &Registration, config: &AppConfig, url: &str, method: &str, settle: bool, out: &mut dyn Write,
) -> Result<()> {
    let url = canonicalize(url, Some(registration.scope())).with_context(|| format!("invalid url: {url}"))?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).context("invalid method")?;

    if !resume_installed(registration, config).await? {
        tracing::warn!(version = %config.cache_version, "version not installed; requests go straight to the network");
    }

    let mut served = registration.fetch(None, FetchRequest::new(method, url)).await?;
    if settle {
        served.settle().await;
    }

    tracing::info!(
        status = served.response.status.as_u16(),
        source = ?served.source,
        bytes = served.response.bytes.len(),
        "fetched"
    );
    out.write_all(&served.response.bytes)?;
    Ok(())
}

pub async fn stores(db: &CacheDb, out: &mut dyn Write) -> Result<()> {
    let stores = db.list_stores().await?;
    if stores.is_empty() {
        writeln!(out, "no cache stores")?;
        return Ok(());
    }

    for store in stores {
        let installed = store.installed_at.as_deref().unwrap_or("-");
        writeln!(out, "{}\t{} entries\tinstalled {}", store.name, store.entries, installed)?;
    }
    Ok(())
}

pub async fn delete(db: &CacheDb, version: &str, out: &mut dyn Write) -> Result<()> {
    let version = CacheVersion::new(version)?;
    if !db.delete_store(&version).await? {
        bail!("no cache store named {version}");
    }
    writeln!(out, "deleted {version}")?;
    Ok(())
}

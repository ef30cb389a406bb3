//! offline_install tool implementation.
//!
//! Installs a cache version from its asset manifest and activates it when
//! skip-waiting allows.

use ks_offline_client::Registration;
use ks_offline_core::{AppConfig, AssetManifest, CacheVersion};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ControllerView, json_result};

/// Input parameters for offline_install tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OfflineInstallParams {
    /// Cache version to install (default: the configured version).
    #[serde(default)]
    pub version: Option<String>,

    /// Assets to fetch, relative to the scope (default: the configured manifest).
    #[serde(default)]
    pub assets: Option<Vec<String>>,
}

/// Output structure for offline_install tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OfflineInstallOutput {
    pub controller: ControllerView,
    /// Entries written to the version's store.
    pub entries: usize,
    /// Whether the controller took over immediately.
    pub activated: bool,
    /// Stores of other versions deleted on activation.
    pub purged: Vec<String>,
    /// Client sessions claimed on activation.
    pub claimed: usize,
}

/// Implementation of the offline_install tool.
pub async fn install_impl(
    registration: &Registration, config: &AppConfig, params: OfflineInstallParams,
) -> Result<CallToolResult, McpError> {
    let version = match params.version {
        Some(name) => CacheVersion::new(name)?,
        None => config.version()?,
    };
    let manifest = params.assets.map(AssetManifest::new).unwrap_or_else(|| config.manifest());

    let outcome = registration.register(version, manifest).await?;
    let took_over = outcome.activated.is_some();
    let activated = outcome.activated.unwrap_or_default();

    let output = OfflineInstallOutput {
        controller: outcome.controller.into(),
        entries: outcome.entries,
        activated: took_over,
        purged: activated.purged,
        claimed: activated.claimed,
    };
    json_result(&output)
}

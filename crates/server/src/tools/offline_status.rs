//! offline_status tool implementation.

use ks_offline_client::Registration;
use ks_offline_core::StoreInfo;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ControllerView, json_result};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OfflineStatusOutput {
    pub scope: String,
    pub installing: Option<ControllerView>,
    pub waiting: Option<ControllerView>,
    pub active: Option<ControllerView>,
    pub clients: usize,
    pub controlled_clients: usize,
    /// Every cache store, oldest first.
    pub stores: Vec<StoreInfo>,
}

/// Implementation of the offline_status tool.
pub async fn status_impl(registration: &Registration) -> Result<CallToolResult, McpError> {
    let status = registration.status().await;
    let stores = registration.db().list_stores().await?;

    let output = OfflineStatusOutput {
        scope: status.scope,
        installing: status.installing.map(Into::into),
        waiting: status.waiting.map(Into::into),
        active: status.active.map(Into::into),
        clients: status.clients,
        controlled_clients: status.controlled_clients,
        stores,
    };
    json_result(&output)
}

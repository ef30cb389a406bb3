//! offline_activate tool implementation.
//!
//! Activates the waiting controller when skip-waiting is disabled.

use ks_offline_client::Registration;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ControllerView, json_result};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OfflineActivateOutput {
    /// The controller now serving requests.
    pub active: Option<ControllerView>,
    /// Stores of other versions deleted on activation.
    pub purged: Vec<String>,
    /// Client sessions claimed on activation.
    pub claimed: usize,
}

/// Implementation of the offline_activate tool.
pub async fn activate_impl(registration: &Registration) -> Result<CallToolResult, McpError> {
    let outcome = registration.activate_waiting().await?;
    let active = registration.status().await.active.map(ControllerView::from);

    json_result(&OfflineActivateOutput { active, purged: outcome.purged, claimed: outcome.claimed })
}

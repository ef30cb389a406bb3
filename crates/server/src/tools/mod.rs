//! MCP tool implementations.
//!
//! This module contains all tools exposed by the ks-offline server.

pub mod cache;
pub mod offline_activate;
pub mod offline_fetch;
pub mod offline_install;
pub mod offline_status;

use ks_offline_client::ControllerInfo;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

pub use offline_fetch::OfflineFetchParams;
pub use offline_install::OfflineInstallParams;

/// A controller instance as reported by the tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ControllerView {
    pub id: u64,
    pub version: String,
    /// One of installing, waiting, activating, active, redundant.
    pub state: String,
}

impl From<ControllerInfo> for ControllerView {
    fn from(info: ControllerInfo) -> Self {
        Self { id: info.id, version: info.version, state: info.state.to_string() }
    }
}

/// Encode a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| ToolError::EncodeFailed(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use ks_offline_client::{Host, MemoryNetwork, Registration};
    use ks_offline_core::CacheDb;
    use rmcp::model::CallToolResult;
    use serde::de::DeserializeOwned;
    use url::Url;

    pub const ORIGIN: &str = "https://krishi.example";

    pub fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    /// Registration over an in-memory database and network serving a
    /// two-asset application shell.
    pub async fn registration() -> (Registration, Arc<MemoryNetwork>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MemoryNetwork::new());
        network.respond_with(&url("/"), 200, &[("content-type", "text/html")], "<html>shell</html>");
        network.respond_with(&url("/app.js"), 200, &[("content-type", "text/javascript")], "boot()");
        let host = Host::new(Url::parse(&url("/")).unwrap(), db, network.clone());
        (Registration::new(host), network)
    }

    pub fn assets() -> Vec<String> {
        vec!["./".to_string(), "./app.js".to_string()]
    }

    pub fn decode<T: DeserializeOwned>(result: &CallToolResult) -> T {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}

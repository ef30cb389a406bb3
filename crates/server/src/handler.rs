//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use ks_offline_client::Registration;
use ks_offline_core::AppConfig;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::cache::{CacheDeleteParams, CacheGetParams, CacheKeysParams, delete_impl, get_impl, keys_impl};
use crate::tools::offline_activate::activate_impl;
use crate::tools::offline_fetch::fetch_impl;
use crate::tools::offline_install::install_impl;
use crate::tools::offline_status::status_impl;
use crate::tools::{OfflineFetchParams, OfflineInstallParams};

/// The main MCP server handler for ks-offline.
#[derive(Clone)]
pub struct McpOfflineServer {
    tool_router: ToolRouter<Self>,
    registration: Arc<Registration>,
    config: Arc<AppConfig>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl McpOfflineServer {
    /// Create a new server handler around a registration.
    pub fn new(registration: Arc<Registration>, config: AppConfig) -> Self {
        Self { tool_router: Self::tool_router(), registration, config: Arc::new(config) }
    }

    #[tool(
        description = "Install a cache version: fetch every manifest asset and store them atomically. Activates immediately when skip-waiting is on or nothing is active yet."
    )]
    async fn offline_install(&self, params: Parameters<OfflineInstallParams>) -> Result<CallToolResult, McpError> {
        install_impl(&self.registration, &self.config, params.0).await
    }

    #[tool(description = "Activate the waiting cache version, deleting the stores of every other version.")]
    async fn offline_activate(&self) -> Result<CallToolResult, McpError> {
        activate_impl(&self.registration).await
    }

    /// Issue a request through the active controller.
    ///
    /// Same-origin GETs are answered stale-while-revalidate; other requests
    /// pass through to the network.
    #[tool(
        description = "Fetch a URL through the offline controller. Cached same-origin GETs are served from cache and refreshed in the background."
    )]
    async fn offline_fetch(&self, params: Parameters<OfflineFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.registration, params.0).await
    }

    #[tool(description = "Report installing, waiting and active controllers, client sessions and cache stores.")]
    async fn offline_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.registration).await
    }

    #[tool(description = "List the request URLs stored under a cache version.")]
    async fn cache_keys(&self, params: Parameters<CacheKeysParams>) -> Result<CallToolResult, McpError> {
        keys_impl(self.registration.db(), params.0).await
    }

    #[tool(description = "Read the stored response for a request under a cache version.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(self.registration.db(), self.registration.scope(), params.0).await
    }

    #[tool(description = "Delete a cache version's store and all of its entries.")]
    async fn cache_delete(&self, params: Parameters<CacheDeleteParams>) -> Result<CallToolResult, McpError> {
        delete_impl(self.registration.db(), params.0).await
    }
}

impl ServerHandler for McpOfflineServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "ks-offline".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::registration;

    #[tokio::test]
    async fn test_tools_listed() {
        let (registration, _network) = registration().await;
        let server = McpOfflineServer::new(Arc::new(registration), AppConfig::default());

        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "cache_delete",
                "cache_get",
                "cache_keys",
                "offline_activate",
                "offline_fetch",
                "offline_install",
                "offline_status"
            ]
        );
    }

    #[tokio::test]
    async fn test_server_info() {
        let (registration, _network) = registration().await;
        let server = McpOfflineServer::new(Arc::new(registration), AppConfig::default());
        let info = server.get_info();
        assert_eq!(info.server_info.name, "ks-offline");
        assert!(info.capabilities.tools.is_some());
    }
}

//! offline_fetch tool implementation.
//!
//! Issues a request as the client application would, through the active
//! controller: cached same-origin GETs are answered from cache and
//! refreshed in the background, everything else goes to the network.

use ks_offline_client::fetch::{Method, canonicalize};
use ks_offline_client::{FetchRequest, Registration, ResponseSource};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Input parameters for offline_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OfflineFetchParams {
    /// URL to request; relative URLs resolve against the scope.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Optional request body.
    #[serde(default)]
    pub body: Option<String>,

    /// Wait for the background refresh or store before returning.
    #[serde(default)]
    pub settle: bool,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for offline_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OfflineFetchOutput {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// cache, network or passthrough.
    pub source: String,
    /// Body decoded as UTF-8, lossily.
    pub body: String,
    pub bytes: usize,
    /// Network time in milliseconds (0 when served from cache).
    pub fetch_ms: u64,
}

fn source_name(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::Passthrough => "passthrough",
    }
}

/// Implementation of the offline_fetch tool.
pub async fn fetch_impl(registration: &Registration, params: OfflineFetchParams) -> Result<CallToolResult, McpError> {
    let url = canonicalize(&params.url, Some(registration.scope()))
        .map_err(|e| ToolError::InvalidInput(format!("url: {e}")))?;
    let method = Method::from_bytes(params.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|e| ToolError::InvalidInput(format!("method: {e}")))?;

    let mut request = FetchRequest::new(method, url);
    if let Some(body) = params.body {
        request = request.with_body(body);
    }

    let mut served = registration.fetch(None, request).await?;
    if params.settle {
        served.settle().await;
    }

    let response = &served.response;
    let output = OfflineFetchOutput {
        url: response.url.to_string(),
        status: response.status.as_u16(),
        content_type: response.content_type().map(str::to_string),
        source: source_name(served.source).to_string(),
        body: String::from_utf8_lossy(&response.bytes).into_owned(),
        bytes: response.bytes.len(),
        fetch_ms: response.fetch_ms,
    };
    json_result(&output)
}

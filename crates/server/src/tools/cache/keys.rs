//! cache_keys tool implementation.
//!
//! Lists the request URLs stored under one cache version.

use ks_offline_core::{CacheDb, CacheVersion, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_keys tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheKeysParams {
    /// Cache version whose store to list.
    pub version: String,
}

/// Output from the cache_keys tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheKeysOutput {
    pub version: String,
    pub urls: Vec<String>,
}

/// Implementation of the cache_keys tool.
pub async fn keys_impl(cache: &CacheDb, params: CacheKeysParams) -> Result<CallToolResult, McpError> {
    let version = CacheVersion::new(params.version)?;
    if !cache.has_store(&version).await? {
        return Err(Error::StoreMissing(version.to_string()).into());
    }

    let urls = cache.list_entry_urls(&version).await?;
    json_result(&CacheKeysOutput { version: version.to_string(), urls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::decode;
    use ks_offline_core::CacheEntry;

    #[tokio::test]
    async fn test_keys_lists_urls() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let version = CacheVersion::new("v1").unwrap();
        cache.open_store(&version).await.unwrap();
        for path in ["/", "/app.js"] {
            let url = format!("https://krishi.example{path}");
            cache
                .put_entry(&version, &CacheEntry::new("GET", &url, 200, Vec::new(), "x"))
                .await
                .unwrap();
        }

        let result = keys_impl(&cache, CacheKeysParams { version: "v1".into() }).await.unwrap();
        let output: CacheKeysOutput = decode(&result);
        assert_eq!(output.urls.len(), 2);
        assert!(output.urls.contains(&"https://krishi.example/app.js".to_string()));
    }

    #[tokio::test]
    async fn test_keys_missing_store() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let err = keys_impl(&cache, CacheKeysParams { version: "v9".into() }).await.unwrap_err();
        assert_eq!(err.code.0, -32022);
    }
}

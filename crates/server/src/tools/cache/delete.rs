//! cache_delete tool implementation.
//!
//! Deletes one cache store and every entry in it.

use ks_offline_core::{CacheDb, CacheVersion};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_delete tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheDeleteParams {
    /// Cache version whose store to delete.
    pub version: String,
}

/// Output from the cache_delete tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheDeleteOutput {
    pub version: String,
    /// False when no such store existed.
    pub deleted: bool,
}

/// Implementation of the cache_delete tool.
pub async fn delete_impl(cache: &CacheDb, params: CacheDeleteParams) -> Result<CallToolResult, McpError> {
    let version = CacheVersion::new(params.version)?;
    let deleted = cache.delete_store(&version).await?;
    if deleted {
        tracing::info!(store = %version, "cache store deleted");
    }

    json_result(&CacheDeleteOutput { version: version.to_string(), deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::decode;

    #[tokio::test]
    async fn test_delete_store() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let version = CacheVersion::new("ks-cache-v0").unwrap();
        cache.open_store(&version).await.unwrap();

        let params = CacheDeleteParams { version: "ks-cache-v0".into() };
        let output: CacheDeleteOutput = decode(&delete_impl(&cache, params.clone()).await.unwrap());
        assert!(output.deleted);
        assert!(!cache.has_store(&version).await.unwrap());

        let again: CacheDeleteOutput = decode(&delete_impl(&cache, params).await.unwrap());
        assert!(!again.deleted);
    }
}

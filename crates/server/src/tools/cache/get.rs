//! cache_get tool implementation.
//!
//! Retrieves the stored response for a request under one cache version.

use ks_offline_client::fetch::canonicalize;
use ks_offline_core::{CacheDb, CacheVersion, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ToolError;
use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Cache version to look in.
    pub version: String,

    /// Request URL; relative URLs resolve against the scope.
    pub url: String,

    /// Request method (default: GET).
    #[serde(default)]
    pub method: Option<String>,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    pub method: String,
    pub url: String,
    pub status_code: u16,
    /// Header values decoded as UTF-8, lossily.
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8, lossily.
    pub body: String,
    pub bytes: usize,
    pub stored_at: String,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(cache: &CacheDb, scope: &Url, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let version = CacheVersion::new(params.version)?;
    let url = canonicalize(&params.url, Some(scope)).map_err(|e| ToolError::InvalidInput(format!("url: {e}")))?;
    let method = params.method.as_deref().unwrap_or("GET").to_ascii_uppercase();

    let entry = cache
        .match_entry(&version, &method, url.as_str())
        .await?
        .ok_or_else(|| Error::CacheMiss(format!("{method} {url} in {version}")))?;

    let output = CacheGetOutput {
        method: entry.method,
        url: entry.url,
        status_code: entry.status_code,
        headers: entry
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), String::from_utf8_lossy(value).into_owned()))
            .collect(),
        body: String::from_utf8_lossy(&entry.body).into_owned(),
        bytes: entry.body.len(),
        stored_at: entry.stored_at,
    };
    json_result(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::decode;
    use ks_offline_core::CacheEntry;

    fn scope() -> Url {
        Url::parse("https://krishi.example/").unwrap()
    }

    #[tokio::test]
    async fn test_get_impl_missing() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let params =
            CacheGetParams { version: "v1".into(), url: "https://krishi.example/".into(), method: None };

        let err = get_impl(&cache, &scope(), params).await.unwrap_err();
        assert_eq!(err.code.0, -32001);
    }

    #[tokio::test]
    async fn test_get_impl_found() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let version = CacheVersion::new("v1").unwrap();
        cache.open_store(&version).await.unwrap();
        let headers = vec![("content-type".to_string(), b"application/json".to_vec())];
        cache
            .put_entry(
                &version,
                &CacheEntry::new("GET", "https://krishi.example/dummy/data.json", 200, headers, "{\"ok\":true}"),
            )
            .await
            .unwrap();

        let params = CacheGetParams {
            version: "v1".into(),
            url: "https://KRISHI.example/dummy/data.json#top".into(),
            method: Some("get".into()),
        };
        let output: CacheGetOutput = decode(&get_impl(&cache, &scope(), params).await.unwrap());
        assert_eq!(output.status_code, 200);
        assert_eq!(output.body, "{\"ok\":true}");
        assert_eq!(output.headers[0].1, "application/json");
    }

    #[tokio::test]
    async fn test_get_impl_relative_url() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let version = CacheVersion::new("v1").unwrap();
        cache.open_store(&version).await.unwrap();
        cache
            .put_entry(&version, &CacheEntry::new("GET", "https://krishi.example/app.js", 200, Vec::new(), "boot()"))
            .await
            .unwrap();

        let params = CacheGetParams { version: "v1".into(), url: "/app.js".into(), method: None };
        let output: CacheGetOutput = decode(&get_impl(&cache, &scope(), params).await.unwrap());
        assert_eq!(output.url, "https://krishi.example/app.js");
        assert_eq!(output.body, "boot()");
    }
}

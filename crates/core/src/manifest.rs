//! Cache versions and asset manifests.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;

/// Version identifier shipped with the front-end.
pub const DEFAULT_CACHE_VERSION: &str = "ks-cache-v1";

/// Assets the front-end needs to boot without network access.
///
/// Paths are relative to the registration scope.
pub const DEFAULT_ASSETS: &[&str] = &[
    "./",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./db.js",
    "./manifest.json",
    "./dummy/data.json",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
];

/// Name of one generation of cached entries.
///
/// Bumping the version on deploy is the only way cached entries are
/// invalidated; there is no per-entry expiry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheVersion(String);

impl CacheVersion {
    /// Create a version identifier, rejecting blank names.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("cache version cannot be empty".into()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CacheVersion {
    fn default() -> Self {
        Self(DEFAULT_CACHE_VERSION.to_string())
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CacheVersion> for String {
    fn from(version: CacheVersion) -> Self {
        version.0
    }
}

/// Ordered list of resources that must be available offline.
///
/// Fixed for the lifetime of a cache version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest(Vec<String>);

impl AssetManifest {
    pub fn new<I, S>(assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(assets.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve every asset against the registration scope.
    ///
    /// Order is preserved. Fragments are dropped and assets that resolve to
    /// the same URL are kept once, since they share a request identity.
    /// Assets outside the scope's origin are rejected.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>, Error> {
        let mut resolved: Vec<Url> = Vec::with_capacity(self.0.len());
        for asset in &self.0 {
            let mut url = scope
                .join(asset.trim())
                .map_err(|e| Error::InvalidUrl(format!("{asset}: {e}")))?;
            url.set_fragment(None);

            if url.origin() != scope.origin() {
                return Err(Error::InvalidUrl(format!("{asset}: not same-origin with {scope}")));
            }
            if !resolved.contains(&url) {
                resolved.push(url);
            }
        }
        Ok(resolved)
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_ASSETS.iter().copied())
    }
}

//! Core types and shared functionality for ks-offline.
//!
//! This crate provides:
//! - The offline data model (cache versions, asset manifests, cache entries)
//! - Cache storage with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;

pub use cache::{CacheDb, CacheEntry, StoreInfo};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use manifest::{AssetManifest, CacheVersion, DEFAULT_ASSETS, DEFAULT_CACHE_VERSION};

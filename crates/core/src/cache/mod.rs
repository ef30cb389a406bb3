//! SQLite-backed storage for versioned offline caches.
//!
//! This module provides a persistent cache using SQLite with async access
//! via tokio-rusqlite. It supports:
//!
//! - Named stores, one per cache version, with an "installed" marker
//! - Entries keyed by a SHA-256 hash of the request identity
//! - Atomic install of a full entry set
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod stores;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::CacheEntry;
pub use stores::StoreInfo;

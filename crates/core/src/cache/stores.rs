//! Cache store lifecycle: open, enumerate, install, delete.

use super::connection::CacheDb;
use super::entries::{encode_headers, upsert_row};
use crate::{CacheEntry, CacheVersion, Error};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// Summary of one named store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StoreInfo {
    pub name: String,
    pub created_at: String,
    /// Set once a full manifest install has committed into this store.
    pub installed_at: Option<String>,
    /// Set once the version has been activated.
    pub activated_at: Option<String>,
    pub entries: u64,
}

impl StoreInfo {
    pub fn is_installed(&self) -> bool {
        self.installed_at.is_some()
    }
}

impl CacheDb {
    /// Open the store for a version, creating it if absent.
    ///
    /// Returns true if the store was created by this call.
    pub async fn open_store(&self, version: &CacheVersion) -> Result<bool, Error> {
        let name = version.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT INTO cache_stores (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                    params![name, now],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn has_store(&self, version: &CacheVersion) -> Result<bool, Error> {
        let name = version.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists =
                    conn.query_row("SELECT EXISTS(SELECT 1 FROM cache_stores WHERE name = ?1)", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether a full install has committed into the version's store.
    pub async fn is_installed(&self, version: &CacheVersion) -> Result<bool, Error> {
        let name = version.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let installed = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM cache_stores WHERE name = ?1 AND installed_at IS NOT NULL)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(installed)
            })
            .await
            .map_err(Error::from)
    }

    /// Record that an installed version has been activated.
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreMissing` if the store is absent or was never
    /// fully installed.
    pub async fn mark_activated(&self, version: &CacheVersion) -> Result<(), Error> {
        let name = version.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let updated = conn.execute(
                    "UPDATE cache_stores SET activated_at = ?2 WHERE name = ?1 AND installed_at IS NOT NULL",
                    params![&name, now],
                )?;
                if updated == 0 {
                    return Err(Error::StoreMissing(name));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Whether the version was activated in this or an earlier process.
    pub async fn is_activated(&self, version: &CacheVersion) -> Result<bool, Error> {
        let name = version.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let activated = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM cache_stores WHERE name = ?1 AND activated_at IS NOT NULL)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(activated)
            })
            .await
            .map_err(Error::from)
    }

    /// Enumerate every store, oldest first.
    pub async fn list_stores(&self) -> Result<Vec<StoreInfo>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<StoreInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT s.name, s.created_at, s.installed_at, s.activated_at,
                        (SELECT COUNT(*) FROM cache_entries e WHERE e.store = s.name)
                     FROM cache_stores s
                     ORDER BY s.created_at, s.name",
                )?;
                let stores = stmt
                    .query_map([], |row| {
                        Ok(StoreInfo {
                            name: row.get(0)?,
                            created_at: row.get(1)?,
                            installed_at: row.get(2)?,
                            activated_at: row.get(3)?,
                            entries: row.get::<_, i64>(4)? as u64,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(stores)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a store and, through the foreign key cascade, its entries.
    ///
    /// Returns false if no such store existed.
    pub async fn delete_store(&self, version: &CacheVersion) -> Result<bool, Error> {
        let name = version.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM cache_stores WHERE name = ?1", params![name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Commit a complete manifest install in one transaction.
    ///
    /// Opens the store (creating it if absent), writes every entry and marks
    /// the store installed. If any statement fails nothing is kept, so a
    /// store is never left holding a partial set of freshly installed
    /// entries.
    pub async fn install_store(&self, version: &CacheVersion, entries: &[CacheEntry]) -> Result<(), Error> {
        let name = version.to_string();
        let rows = entries
            .iter()
            .map(|entry| -> Result<(CacheEntry, String), Error> { Ok((entry.clone(), encode_headers(entry)?)) })
            .collect::<Result<Vec<_>, _>>()?;
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO cache_stores (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                    params![&name, &now],
                )?;
                for (entry, headers_json) in &rows {
                    upsert_row(&tx, &name, entry, headers_json)?;
                }
                tx.execute("UPDATE cache_stores SET installed_at = ?2 WHERE name = ?1", params![&name, &now])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> CacheVersion {
        CacheVersion::new(name).unwrap()
    }

    fn make_entry(url: &str) -> CacheEntry {
        CacheEntry::new("GET", url, 200, Vec::new(), format!("body of {url}"))
    }

    #[tokio::test]
    async fn test_open_store_creates_once() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.open_store(&v("v1")).await.unwrap());
        assert!(!db.open_store(&v("v1")).await.unwrap());
        assert!(db.has_store(&v("v1")).await.unwrap());
        assert!(!db.is_installed(&v("v1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_store_marks_installed() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entries = vec![make_entry("https://krishi.example/"), make_entry("https://krishi.example/index.html")];

        db.install_store(&v("v1"), &entries).await.unwrap();

        assert!(db.is_installed(&v("v1")).await.unwrap());
        let stores = db.list_stores().await.unwrap();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].name, "v1");
        assert_eq!(stores[0].entries, 2);
        assert!(stores[0].is_installed());
    }

    #[tokio::test]
    async fn test_mark_activated_requires_install() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("half")).await.unwrap();
        assert!(matches!(db.mark_activated(&v("half")).await, Err(Error::StoreMissing(_))));
        assert!(matches!(db.mark_activated(&v("absent")).await, Err(Error::StoreMissing(_))));

        db.install_store(&v("v1"), &[make_entry("https://krishi.example/")])
            .await
            .unwrap();
        assert!(!db.is_activated(&v("v1")).await.unwrap());
        db.mark_activated(&v("v1")).await.unwrap();
        assert!(db.is_activated(&v("v1")).await.unwrap());
        let stores = db.list_stores().await.unwrap();
        let v1 = stores.iter().find(|s| s.name == "v1").unwrap();
        assert!(v1.activated_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_store_cascades() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.install_store(&v("v1"), &[make_entry("https://krishi.example/")])
            .await
            .unwrap();

        assert!(db.delete_store(&v("v1")).await.unwrap());
        assert!(!db.delete_store(&v("v1")).await.unwrap());
        assert!(db.list_stores().await.unwrap().is_empty());
        assert_eq!(db.entry_count(&v("v1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_stores_multiple() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("ks-cache-v0")).await.unwrap();
        db.install_store(&v("ks-cache-v1"), &[make_entry("https://krishi.example/")])
            .await
            .unwrap();

        let stores = db.list_stores().await.unwrap();
        let names: Vec<&str> = stores.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"ks-cache-v0"));
        assert!(names.contains(&"ks-cache-v1"));
    }
}

//! Cache entry reads and writes.
//!
//! An entry maps a request identity (method + URL) to the response captured
//! for it. Every operation names the store (cache version) it acts on.

use super::connection::CacheDb;
use super::hash::compute_request_key;
use crate::{CacheVersion, Error};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

/// A captured response stored under a request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key_hash: String,
    pub method: String,
    pub url: String,
    pub status_code: u16,
    /// Response headers in arrival order. Repeated names are kept and
    /// values are raw bytes, since they need not be UTF-8.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl CacheEntry {
    /// Capture a response for `method url`, stamped with the current time.
    pub fn new(
        method: &str, url: &str, status_code: u16, headers: Vec<(String, Vec<u8>)>, body: impl Into<Vec<u8>>,
    ) -> Self {
        let method = method.to_ascii_uppercase();
        Self {
            key_hash: compute_request_key(&method, url),
            method,
            url: url.to_string(),
            status_code,
            headers,
            body: body.into(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Row shape before the header list is decoded.
struct EntryRow {
    key_hash: String,
    method: String,
    url: String,
    status_code: u16,
    headers_json: String,
    body: Vec<u8>,
    stored_at: String,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key_hash: row.get(0)?,
            method: row.get(1)?,
            url: row.get(2)?,
            status_code: row.get(3)?,
            headers_json: row.get(4)?,
            body: row.get(5)?,
            stored_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CacheEntry, Error> {
        let headers = serde_json::from_str(&self.headers_json)
            .map_err(|e| Error::CorruptEntry(format!("{} {}: {e}", self.method, self.url)))?;
        Ok(CacheEntry {
            key_hash: self.key_hash,
            method: self.method,
            url: self.url,
            status_code: self.status_code,
            headers,
            body: self.body,
            stored_at: self.stored_at,
        })
    }
}

pub(crate) fn encode_headers(entry: &CacheEntry) -> Result<String, Error> {
    serde_json::to_string(&entry.headers).map_err(|e| Error::InvalidInput(format!("unencodable headers: {e}")))
}

/// Insert or replace one entry. The caller owns the transaction, if any.
pub(crate) fn upsert_row(
    conn: &rusqlite::Connection, store: &str, entry: &CacheEntry, headers_json: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cache_entries (store, key_hash, method, url, status_code, headers_json, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(store, key_hash) DO UPDATE SET
            status_code = excluded.status_code,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            store,
            &entry.key_hash,
            &entry.method,
            &entry.url,
            entry.status_code,
            headers_json,
            &entry.body,
            &entry.stored_at,
        ],
    )?;
    Ok(())
}

impl CacheDb {
    /// Store an entry in an existing store, replacing any previous entry for
    /// the same request identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreMissing` if the store does not exist. Writes never
    /// recreate a store that has been deleted.
    pub async fn put_entry(&self, version: &CacheVersion, entry: &CacheEntry) -> Result<(), Error> {
        let store = version.to_string();
        let headers_json = encode_headers(entry)?;
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let exists: bool =
                    tx.query_row("SELECT EXISTS(SELECT 1 FROM cache_stores WHERE name = ?1)", params![&store], |row| {
                        row.get(0)
                    })?;
                if !exists {
                    return Err(Error::StoreMissing(store));
                }
                upsert_row(&tx, &store, &entry, &headers_json)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up the entry for `method url` in a store.
    ///
    /// Returns None if the store or the entry does not exist.
    pub async fn match_entry(&self, version: &CacheVersion, method: &str, url: &str) -> Result<Option<CacheEntry>, Error> {
        let store = version.to_string();
        let key_hash = compute_request_key(method, url);
        let row = self
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let result = conn.query_row(
                    "SELECT key_hash, method, url, status_code, headers_json, body, stored_at
                     FROM cache_entries WHERE store = ?1 AND key_hash = ?2",
                    params![store, key_hash],
                    EntryRow::from_row,
                );

                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(EntryRow::decode).transpose()
    }

    /// Request URLs held by a store, sorted.
    pub async fn list_entry_urls(&self, version: &CacheVersion) -> Result<Vec<String>, Error> {
        let store = version.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM cache_entries WHERE store = ?1 ORDER BY url, method")?;
                let urls = stmt
                    .query_map(params![store], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a store.
    pub async fn entry_count(&self, version: &CacheVersion) -> Result<u64, Error> {
        let store = version.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM cache_entries WHERE store = ?1", params![store], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
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

    fn make_entry(url: &str, body: &str) -> CacheEntry {
        CacheEntry::new(
            "GET",
            url,
            200,
            vec![("content-type".into(), b"application/json".to_vec()), ("x-seq".into(), b"1".to_vec())],
            body.as_bytes(),
        )
    }

    #[test]
    fn test_entry_new_normalizes_method() {
        let entry = CacheEntry::new("get", "https://krishi.example/", 200, Vec::new(), "x");
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.key_hash, compute_request_key("GET", "https://krishi.example/"));
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("v1")).await.unwrap();

        let entry = make_entry("https://krishi.example/data.json", "{\"mandi\":[]}");
        db.put_entry(&v("v1"), &entry).await.unwrap();

        let found = db
            .match_entry(&v("v1"), "GET", "https://krishi.example/data.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, entry);
    }

    #[tokio::test]
    async fn test_header_bytes_survive_storage() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("v1")).await.unwrap();

        let disposition = b"attachment; filename=\"mandi-\xe9.csv\"".to_vec();
        let entry = CacheEntry::new(
            "GET",
            "https://krishi.example/prices.csv",
            200,
            vec![("content-disposition".into(), disposition.clone())],
            "crop,price",
        );
        db.put_entry(&v("v1"), &entry).await.unwrap();

        let found = db
            .match_entry(&v("v1"), "GET", "https://krishi.example/prices.csv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.headers, vec![("content-disposition".to_string(), disposition)]);
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("v1")).await.unwrap();

        db.put_entry(&v("v1"), &make_entry("https://krishi.example/data.json", "old"))
            .await
            .unwrap();
        db.put_entry(&v("v1"), &make_entry("https://krishi.example/data.json", "new"))
            .await
            .unwrap();

        let found = db
            .match_entry(&v("v1"), "GET", "https://krishi.example/data.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.body, b"new");
        assert_eq!(db.entry_count(&v("v1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_into_missing_store() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let result = db
            .put_entry(&v("gone"), &make_entry("https://krishi.example/", "x"))
            .await;
        assert!(matches!(result, Err(Error::StoreMissing(name)) if name == "gone"));
        assert!(!db.has_store(&v("gone")).await.unwrap());
    }

    #[tokio::test]
    async fn test_match_is_scoped_to_store_and_method() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("v1")).await.unwrap();
        db.open_store(&v("v2")).await.unwrap();
        db.put_entry(&v("v1"), &make_entry("https://krishi.example/data.json", "x"))
            .await
            .unwrap();

        assert!(
            db.match_entry(&v("v2"), "GET", "https://krishi.example/data.json")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            db.match_entry(&v("v1"), "POST", "https://krishi.example/data.json")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_list_entry_urls() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store(&v("v1")).await.unwrap();
        db.put_entry(&v("v1"), &make_entry("https://krishi.example/styles.css", "a"))
            .await
            .unwrap();
        db.put_entry(&v("v1"), &make_entry("https://krishi.example/app.js", "b"))
            .await
            .unwrap();

        let urls = db.list_entry_urls(&v("v1")).await.unwrap();
        assert_eq!(urls, vec!["https://krishi.example/app.js", "https://krishi.example/styles.css"]);
    }
}

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::store::{StoreError, format_timestamp, lock, parse_timestamp};

/// A hash confirmed malicious by strong remote consensus
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DenyListEntry {
    pub sha256: String,
    pub added_at: DateTime<Utc>,
}

/// Persistent set of known-bad SHA-256 hashes. Entries are only ever added.
pub struct DenyListStore {
    conn: Mutex<Connection>,
}

impl DenyListStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS malware_hashes (
                sha256 TEXT PRIMARY KEY,
                added_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn contains(&self, sha256: &str) -> Result<bool, StoreError> {
        let conn = lock(&self.conn)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM malware_hashes WHERE sha256 = ?1",
                params![sha256],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert if absent. Returns true when the hash was newly added.
    pub fn insert(&self, sha256: &str) -> Result<bool, StoreError> {
        let conn = lock(&self.conn)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO malware_hashes (sha256, added_at) VALUES (?1, ?2)",
            params![sha256, format_timestamp(Utc::now())],
        )?;
        Ok(inserted > 0)
    }

    /// Newest first
    pub fn list(&self, limit: usize) -> Result<Vec<DenyListEntry>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT sha256, added_at FROM malware_hashes ORDER BY added_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (sha256, added) = row?;
            match parse_timestamp(&added) {
                Some(added_at) => entries.push(DenyListEntry { sha256, added_at }),
                None => log::warn!("Deny-list entry {} has bad timestamp {:?}", sha256, added),
            }
        }
        Ok(entries)
    }
}

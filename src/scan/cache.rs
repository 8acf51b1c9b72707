use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::store::{StoreError, format_timestamp, lock, parse_timestamp};
use super::types::{KeyKind, ScanKey, Verdict};

/// A cached verdict
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CacheEntry {
    pub key: ScanKey,
    pub verdict: Verdict,
    pub last_scanned: DateTime<Utc>,
}

/// Persistent `(value, kind) -> verdict` mapping
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open or create the cache database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scan_cache (
                key TEXT NOT NULL,
                key_kind TEXT NOT NULL,
                verdict_json TEXT NOT NULL,
                last_scanned TEXT NOT NULL,
                PRIMARY KEY (key, key_kind)
            );
            CREATE INDEX IF NOT EXISTS idx_scan_cache_last_scanned ON scan_cache(last_scanned);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a verdict. Rows whose verdict cannot be decoded count as a miss.
    pub fn get(&self, key: &ScanKey) -> Result<Option<CacheEntry>, StoreError> {
        let conn = lock(&self.conn)?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT verdict_json, last_scanned FROM scan_cache
                 WHERE key = ?1 AND key_kind = ?2",
                params![key.value, key.kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(json, scanned)| decode_entry(key.clone(), &json, &scanned)))
    }

    /// Insert or overwrite the verdict for `key`
    pub fn upsert(&self, key: &ScanKey, verdict: &Verdict) -> Result<(), StoreError> {
        self.upsert_at(key, verdict, Utc::now())
    }

    pub fn upsert_at(
        &self,
        key: &ScanKey,
        verdict: &Verdict,
        scanned_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(verdict)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO scan_cache (key, key_kind, verdict_json, last_scanned)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key, key_kind) DO UPDATE SET
                verdict_json = excluded.verdict_json,
                last_scanned = excluded.last_scanned",
            params![key.value, key.kind.as_str(), json, format_timestamp(scanned_at)],
        )?;
        Ok(())
    }

    /// Delete entries last scanned more than `retention` ago. A retention
    /// reaching past the earliest representable time removes nothing.
    pub fn purge_older_than(&self, retention: chrono::Duration) -> Result<usize, StoreError> {
        match Utc::now().checked_sub_signed(retention) {
            Some(cutoff) => self.purge_before(cutoff),
            None => Ok(0),
        }
    }

    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM scan_cache WHERE last_scanned < ?1",
            params![format_timestamp(cutoff)],
        )?;
        Ok(removed)
    }

    /// Most recently scanned entries first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT key, key_kind, verdict_json, last_scanned FROM scan_cache
             ORDER BY last_scanned DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (value, kind, json, scanned) = row?;
            let kind = match kind.as_str() {
                "sha256" => KeyKind::Hash,
                "url" => KeyKind::Url,
                other => {
                    log::warn!("Skipping cache row with unknown key kind {:?}", other);
                    continue;
                }
            };
            if let Some(entry) = decode_entry(ScanKey { value, kind }, &json, &scanned) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

fn decode_entry(key: ScanKey, json: &str, scanned: &str) -> Option<CacheEntry> {
    let verdict: Verdict = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Ignoring undecodable cache record for {}: {}", key, e);
            return None;
        }
    };
    let Some(last_scanned) = parse_timestamp(scanned) else {
        log::warn!("Ignoring cache record for {} with bad timestamp {:?}", key, scanned);
        return None;
    };
    Some(CacheEntry {
        key,
        verdict,
        last_scanned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::normalizer::normalize_table;
    use serde_json::json;

    fn sample_verdict() -> Verdict {
        normalize_table(&json!({"A": {"category": "malicious"}, "B": {"category": "clean"}}))
    }

    #[test]
    fn test_upsert_then_get() {
        let store = CacheStore::open_in_memory().unwrap();
        let key = ScanKey::url("http://example.test");
        store.upsert(&key, &sample_verdict()).unwrap();

        let entry = store.get(&key).unwrap().unwrap();
        assert_eq!(entry.verdict, sample_verdict());
        assert_eq!(entry.key, key);
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = CacheStore::open_in_memory().unwrap();
        let key = ScanKey::hash("aa");
        store.upsert(&key, &sample_verdict()).unwrap();
        store.upsert(&key, &Verdict::empty()).unwrap();

        assert_eq!(store.get(&key).unwrap().unwrap().verdict, Verdict::empty());
        assert_eq!(store.list_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let store = CacheStore::open_in_memory().unwrap();
        store.upsert(&ScanKey::hash("same"), &sample_verdict()).unwrap();

        assert!(store.get(&ScanKey::url("same")).unwrap().is_none());
        store.upsert(&ScanKey::url("same"), &Verdict::empty()).unwrap();
        assert_eq!(
            store.get(&ScanKey::hash("same")).unwrap().unwrap().verdict,
            sample_verdict()
        );
    }

    #[test]
    fn test_malformed_record_is_a_miss() {
        let store = CacheStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO scan_cache VALUES ('bad', 'url', '{oops', ?1)",
                params![format_timestamp(Utc::now())],
            )
            .unwrap();
        }
        assert!(store.get(&ScanKey::url("bad")).unwrap().is_none());
        assert!(store.list_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_purge_removes_only_old_rows() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .upsert_at(&ScanKey::hash("old"), &Verdict::empty(), now - chrono::Duration::days(31))
            .unwrap();
        store
            .upsert_at(&ScanKey::hash("new"), &Verdict::empty(), now - chrono::Duration::days(2))
            .unwrap();

        let removed = store.purge_older_than(chrono::Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&ScanKey::hash("old")).unwrap().is_none());
        assert!(store.get(&ScanKey::hash("new")).unwrap().is_some());
    }

    #[test]
    fn test_purge_with_out_of_range_retention_keeps_everything() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .upsert_at(
                &ScanKey::hash("ancient"),
                &Verdict::empty(),
                Utc::now() - chrono::Duration::days(3650),
            )
            .unwrap();

        let removed = store
            .purge_older_than(chrono::Duration::days(100_000_000))
            .unwrap();
        assert_eq!(removed, 0);
        assert!(store.get(&ScanKey::hash("ancient")).unwrap().is_some());
    }

    #[test]
    fn test_list_recent_newest_first() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .upsert_at(&ScanKey::url("first"), &Verdict::empty(), now - chrono::Duration::hours(2))
            .unwrap();
        store
            .upsert_at(&ScanKey::url("second"), &Verdict::empty(), now)
            .unwrap();

        let entries = store.list_recent(1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.value, "second");
    }
}

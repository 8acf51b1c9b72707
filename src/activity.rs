//! Append-only JSON-lines record of every resolution

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::{Digests, Origin, Resolution, Verdict};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digests: Option<Digests>,
    pub verdict: Verdict,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl ActivityRecord {
    pub fn new(event_type: &str, resolution: &Resolution) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            file_path: None,
            url: None,
            digests: None,
            verdict: resolution.verdict.clone(),
            origin: resolution.origin,
            degraded: resolution.degraded.clone(),
        }
    }
}

pub struct ActivityLog {
    path: PathBuf,
    // Serialises appends from concurrent watcher threads
    write_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, record: &ActivityRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("failed to create activity log directory")?;
        }

        let mut line = serde_json::to_string(record).context("failed to serialize activity")?;
        line.push('\n');

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    /// Most recent records last; unparseable lines are skipped
    pub fn read_all(&self) -> Result<Vec<ActivityRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanKey;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(&dir.path().join("logs").join("activity.jsonl"));
        let resolution = Resolution {
            key: ScanKey::url("http://example.test"),
            verdict: Verdict::empty(),
            origin: Origin::Remote,
            degraded: Some("provider API key not configured".to_string()),
        };

        let mut record = ActivityRecord::new("manual_url_scan", &resolution);
        record.url = Some("http://example.test".to_string());
        log.append(&record).unwrap();
        log.append(&ActivityRecord::new("manual_file_scan", &resolution))
            .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record);
        assert_eq!(records[1].event_type, "manual_file_scan");
    }
}

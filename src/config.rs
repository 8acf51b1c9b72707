use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default settings file, relative to the working directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable that overrides `api_key`
pub const API_KEY_ENV: &str = "SCANWARD_API_KEY";

/// A remote verdict with at least this many malicious engines promotes the
/// hash into the local deny-list.
pub const PROMOTION_THRESHOLD: u32 = 3;

/// Process-wide settings, loaded once at startup and never re-read
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider API key; without it the remote tier is permanently empty
    pub api_key: Option<String>,
    /// Provider API root
    pub api_base_url: String,
    /// Directories watched for newly created files
    pub watch_folders: Vec<PathBuf>,
    /// When false no scan is resolved at all
    pub scanning_enabled: bool,
    /// Delay between URL analysis polls
    pub poll_interval_ms: u64,
    /// Maximum number of URL analysis polls
    pub poll_attempts: u32,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Cached verdicts older than this are purged
    pub cache_retention_days: u32,
    pub cache_db_path: PathBuf,
    pub denylist_db_path: PathBuf,
    pub activity_log_path: PathBuf,
    pub discord_webhook: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Listen address for the live event stream, e.g. "127.0.0.1:8765"
    pub events_addr: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://www.virustotal.com/api/v3".to_string(),
            watch_folders: Vec::new(),
            scanning_enabled: true,
            poll_interval_ms: 1000,
            poll_attempts: 120,
            request_timeout_secs: 15,
            cache_retention_days: 30,
            cache_db_path: PathBuf::from("scan_history.db"),
            denylist_db_path: PathBuf::from("malware_hashes.db"),
            activity_log_path: PathBuf::from("activity.jsonl"),
            discord_webhook: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            events_addr: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults if the file does
    /// not exist. The API key environment variable wins over the file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file {}", path.display()))?;
            Self::from_json(&content)
                .with_context(|| format!("failed to parse settings file {}", path.display()))?
        } else {
            log::info!("No settings file at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                settings.api_key = Some(key.trim().to_string());
            }
        }

        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("invalid settings JSON")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cache_retention_days))
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

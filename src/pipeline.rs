//! Entry point shared by manual scans and the folder watchers.
//!
//! Every resolution, whichever tier answered it, is recorded in the activity
//! log and offered to the notification gate. Watcher resolutions also land
//! on the event bus.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::activity::{ActivityLog, ActivityRecord};
use crate::alert::{AlertContext, NotificationGate, build_sinks};
use crate::config::Settings;
use crate::events::{EventBus, WatchEvent};
use crate::scan::{
    AggregatorClient, CacheStore, DenyListStore, DigestComputer, Digests, Resolution, ScanKey,
    ScanResolver, StreamingDigester,
};
use crate::watch::ReadyFileHandler;

pub const EVENT_MANUAL_URL: &str = "manual_url_scan";
pub const EVENT_MANUAL_FILE: &str = "manual_file_scan";
pub const EVENT_WATCHED_FILE: &str = "watchdog_file_created";

/// Digests plus resolution for a scanned file
#[derive(Clone, Debug)]
pub struct FileScan {
    pub digests: Digests,
    pub resolution: Resolution,
}

pub struct ScanPipeline {
    settings: Arc<Settings>,
    resolver: Arc<ScanResolver>,
    bus: Arc<EventBus>,
    gate: NotificationGate,
    digester: Box<dyn DigestComputer>,
    activity: ActivityLog,
}

impl ScanPipeline {
    pub fn new(
        settings: Arc<Settings>,
        resolver: Arc<ScanResolver>,
        bus: Arc<EventBus>,
        gate: NotificationGate,
        digester: Box<dyn DigestComputer>,
    ) -> Self {
        let activity = ActivityLog::new(&settings.activity_log_path);
        Self {
            settings,
            resolver,
            bus,
            gate,
            digester,
            activity,
        }
    }

    /// Open the stores and provider client described by `settings`
    pub fn open(settings: Arc<Settings>, bus: Arc<EventBus>) -> Result<Self> {
        let denylist = DenyListStore::open(&settings.denylist_db_path).with_context(|| {
            format!("failed to open deny-list {}", settings.denylist_db_path.display())
        })?;
        let cache = CacheStore::open(&settings.cache_db_path).with_context(|| {
            format!("failed to open scan cache {}", settings.cache_db_path.display())
        })?;

        let client = AggregatorClient::new(&settings);
        if !client.is_available() {
            log::warn!("No provider API key configured; remote scanning degraded");
        }

        let resolver = ScanResolver::new(Arc::new(denylist), Arc::new(cache), Arc::new(client));
        let gate = NotificationGate::new(build_sinks(&settings));

        Ok(Self::new(
            settings,
            Arc::new(resolver),
            bus,
            gate,
            Box::new(StreamingDigester),
        ))
    }

    pub fn resolver(&self) -> &ScanResolver {
        &self.resolver
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scanning_enabled(&self) -> bool {
        self.settings.scanning_enabled
    }

    /// Resolve a URL. `Ok(None)` when scanning is disabled.
    pub fn scan_url(&self, url: &str) -> Result<Option<Resolution>> {
        if !self.scanning_enabled() {
            log::info!("Scanning disabled, ignoring URL {}", url);
            return Ok(None);
        }
        let url = url.trim();
        if url.is_empty() {
            bail!("empty URL");
        }

        let resolution = self.resolver.resolve(&ScanKey::url(url));

        let mut record = ActivityRecord::new(EVENT_MANUAL_URL, &resolution);
        record.url = Some(url.to_string());
        self.record(&record);

        self.gate
            .notify(&resolution.verdict, &AlertContext::for_url(EVENT_MANUAL_URL, url));
        Ok(Some(resolution))
    }

    /// Digest and resolve a file. `Ok(None)` when scanning is disabled.
    pub fn scan_file(&self, path: &Path) -> Result<Option<FileScan>> {
        if !self.scanning_enabled() {
            log::info!("Scanning disabled, ignoring file {}", path.display());
            return Ok(None);
        }

        let digests = self
            .digester
            .compute(path)
            .with_context(|| format!("failed to digest {}", path.display()))?;
        let resolution = self.resolver.resolve(&ScanKey::hash(&digests.sha256));

        self.record(&file_record(EVENT_MANUAL_FILE, path, &digests, &resolution));
        self.gate.notify(
            &resolution.verdict,
            &AlertContext::for_file(EVENT_MANUAL_FILE, path.to_path_buf(), digests.clone()),
        );

        Ok(Some(FileScan {
            digests,
            resolution,
        }))
    }

    fn record(&self, record: &ActivityRecord) {
        if let Err(e) = self.activity.append(record) {
            log::warn!("Activity log write failed: {:#}", e);
        }
    }
}

fn file_record(
    event_type: &str,
    path: &Path,
    digests: &Digests,
    resolution: &Resolution,
) -> ActivityRecord {
    let mut record = ActivityRecord::new(event_type, resolution);
    record.file_path = Some(path.to_path_buf());
    record.digests = Some(digests.clone());
    record
}

impl ReadyFileHandler for ScanPipeline {
    fn on_file_ready(&self, path: &Path) {
        if !self.scanning_enabled() {
            return;
        }

        let digests = match self.digester.compute(path) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Failed to digest {}: {}", path.display(), e);
                return;
            }
        };

        let resolution = self.resolver.resolve(&ScanKey::hash(&digests.sha256));
        log::info!(
            "{} resolved via {}: {} malicious, {} suspicious",
            path.display(),
            resolution.origin,
            resolution.verdict.counts.malicious,
            resolution.verdict.counts.suspicious
        );

        self.bus.append(WatchEvent::file_created(
            path.to_path_buf(),
            digests.clone(),
            resolution.verdict.clone(),
            resolution.origin,
        ));
        self.record(&file_record(EVENT_WATCHED_FILE, path, &digests, &resolution));
        self.gate.notify(
            &resolution.verdict,
            &AlertContext::for_file(EVENT_WATCHED_FILE, path.to_path_buf(), digests),
        );
    }
}

use std::sync::Arc;

use super::aggregator::{AggregatorError, RemoteAggregator};
use super::cache::CacheStore;
use super::denylist::DenyListStore;
use super::types::{KeyKind, Origin, Resolution, ScanKey, Verdict};
use crate::config::PROMOTION_THRESHOLD;

/// Resolves a key through deny-list, cache and remote tiers, in that order.
///
/// The resolver is the only writer of cache entries and deny-list entries.
/// It is shared between the watcher threads and manual requests.
pub struct ScanResolver {
    denylist: Arc<DenyListStore>,
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteAggregator>,
}

impl ScanResolver {
    pub fn new(
        denylist: Arc<DenyListStore>,
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteAggregator>,
    ) -> Self {
        Self {
            denylist,
            cache,
            remote,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn denylist(&self) -> &DenyListStore {
        &self.denylist
    }

    pub fn resolve(&self, key: &ScanKey) -> Resolution {
        if let Some(resolution) = self.check_denylist(key) {
            return resolution;
        }

        if let Some(resolution) = self.check_cache(key) {
            return resolution;
        }

        self.resolve_remote(key)
    }

    fn check_denylist(&self, key: &ScanKey) -> Option<Resolution> {
        if key.kind != KeyKind::Hash {
            return None;
        }

        match self.denylist.contains(&key.value) {
            Ok(true) => {
                log::info!("Deny-list hit for {}", key);
                Some(Resolution {
                    key: key.clone(),
                    verdict: Verdict::local_deny(),
                    origin: Origin::LocalDeny,
                    degraded: None,
                })
            }
            Ok(false) => None,
            Err(e) => {
                log::warn!("Deny-list lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    fn check_cache(&self, key: &ScanKey) -> Option<Resolution> {
        match self.cache.get(key) {
            Ok(Some(entry)) => {
                log::info!(
                    "Cache hit for {} (last scanned {})",
                    key,
                    entry.last_scanned.format("%Y-%m-%d %H:%M:%S")
                );
                Some(Resolution {
                    key: key.clone(),
                    verdict: entry.verdict,
                    origin: Origin::Cache,
                    degraded: None,
                })
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    fn resolve_remote(&self, key: &ScanKey) -> Resolution {
        let outcome = match key.kind {
            KeyKind::Url => self.remote.resolve_url(&key.value),
            KeyKind::Hash => self.remote.resolve_file_hash(&key.value),
        };

        let (verdict, degraded) = match outcome {
            Ok(verdict) => {
                log::info!(
                    "Remote verdict for {}: {} malicious, {} suspicious across {} engines",
                    key,
                    verdict.counts.malicious,
                    verdict.counts.suspicious,
                    verdict.engine_count()
                );
                (verdict, None)
            }
            Err(AggregatorError::Unconfigured) => {
                log::info!("No provider API key, remote tier empty for {}", key);
                (Verdict::empty(), Some(AggregatorError::Unconfigured.to_string()))
            }
            Err(e) => {
                log::warn!("Remote lookup degraded for {}: {}", key, e);
                (Verdict::empty(), Some(e.to_string()))
            }
        };

        if let Err(e) = self.cache.upsert(key, &verdict) {
            log::error!("Failed to cache verdict for {}: {}", key, e);
        }

        if key.kind == KeyKind::Hash && verdict.counts.malicious >= PROMOTION_THRESHOLD {
            match self.denylist.insert(&key.value) {
                Ok(true) => log::info!("Promoted {} to the deny-list", key),
                Ok(false) => {}
                Err(e) => log::error!("Failed to promote {} to the deny-list: {}", key, e),
            }
        }

        Resolution {
            key: key.clone(),
            verdict,
            origin: Origin::Remote,
            degraded,
        }
    }
}

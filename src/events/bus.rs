use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::{Digests, Origin, Verdict};

/// Number of events retained by default
pub const EVENT_CAPACITY: usize = 200;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    FileCreated,
}

/// A file observed by a folder watcher, with its resolved verdict
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub digests: Option<Digests>,
    pub verdict: Verdict,
    pub origin: Origin,
}

impl WatchEvent {
    pub fn file_created(path: PathBuf, digests: Digests, verdict: Verdict, origin: Origin) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: WatchEventKind::FileCreated,
            path,
            digests: Some(digests),
            verdict,
            origin,
        }
    }
}

struct Ring {
    events: VecDeque<WatchEvent>,
    /// Total number of events ever appended
    appended: u64,
}

/// Ring buffer of the most recent watch events
pub struct EventBus {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                appended: 0,
            }),
        }
    }

    // A panic elsewhere must not stop the bus from accepting events
    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append, evicting the oldest event when full
    pub fn append(&self, event: WatchEvent) {
        let mut ring = self.ring();
        if ring.events.len() == self.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event);
        ring.appended += 1;
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<WatchEvent> {
        self.ring().events.iter().cloned().collect()
    }

    /// Snapshot plus sequence number, only if anything was appended since `seen`
    pub fn snapshot_if_changed(&self, seen: u64) -> Option<(u64, Vec<WatchEvent>)> {
        let ring = self.ring();
        if ring.appended == seen {
            return None;
        }
        Some((ring.appended, ring.events.iter().cloned().collect()))
    }

    pub fn len(&self) -> usize {
        self.ring().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn appended(&self) -> u64 {
        self.ring().appended
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

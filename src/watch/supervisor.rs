use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, unbounded};
use notify::event::CreateKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;

use super::cancel::CancelToken;
use super::stability::{Readiness, StabilityDetector};
use crate::config::Settings;

/// Delay before re-attaching to a missing or failed watch target
pub const TARGET_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How often an idle watch loop checks for cancellation and target loss
const IDLE_TICK: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watch target {0} is missing or not a directory")]
    TargetUnavailable(PathBuf),
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),
    #[error("watcher channel closed")]
    ChannelClosed,
}

/// Receives files that appeared in a watched folder and finished writing
pub trait ReadyFileHandler: Send + Sync {
    fn on_file_ready(&self, path: &Path);
}

/// Runs one independent watch loop per configured folder
pub struct FolderWatchSupervisor {
    settings: Arc<Settings>,
    handler: Arc<dyn ReadyFileHandler>,
    detector: Arc<StabilityDetector>,
    retry_interval: Duration,
}

impl FolderWatchSupervisor {
    pub fn new(settings: Arc<Settings>, handler: Arc<dyn ReadyFileHandler>) -> Self {
        Self {
            settings,
            handler,
            detector: Arc::new(StabilityDetector::new()),
            retry_interval: TARGET_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Spawn the watch threads. Nothing is started while scanning is disabled.
    pub fn spawn(&self, cancel: &CancelToken) -> Vec<JoinHandle<()>> {
        if !self.settings.scanning_enabled {
            log::warn!("Scanning disabled, folder watchers not started");
            return Vec::new();
        }

        self.settings
            .watch_folders
            .iter()
            .map(|folder| {
                let folder = folder.clone();
                let handler = Arc::clone(&self.handler);
                let detector = Arc::clone(&self.detector);
                let cancel = cancel.clone();
                let retry = self.retry_interval;
                thread::spawn(move || supervise_folder(&folder, handler, detector, cancel, retry))
            })
            .collect()
    }
}

fn supervise_folder(
    folder: &Path,
    handler: Arc<dyn ReadyFileHandler>,
    detector: Arc<StabilityDetector>,
    cancel: CancelToken,
    retry: Duration,
) {
    log::info!("Watch loop started for {}", folder.display());

    while !cancel.is_cancelled() {
        match watch_folder(folder, handler.as_ref(), &detector, &cancel) {
            Ok(()) => break,
            Err(e) => {
                log::warn!("{}; retrying in {}s", e, retry.as_secs_f32());
                if !cancel.sleep(retry) {
                    break;
                }
            }
        }
    }

    log::info!("Watch loop stopped for {}", folder.display());
}

/// Watch until cancelled (`Ok`) or the target becomes unusable (`Err`)
fn watch_folder(
    folder: &Path,
    handler: &dyn ReadyFileHandler,
    detector: &StabilityDetector,
    cancel: &CancelToken,
) -> Result<(), WatchError> {
    if !folder.is_dir() {
        return Err(WatchError::TargetUnavailable(folder.to_path_buf()));
    }

    let (tx, rx) = unbounded();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(folder, RecursiveMode::NonRecursive)?;
    log::info!("Monitoring {}", folder.display());

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match rx.recv_timeout(IDLE_TICK) {
            Ok(Ok(event)) => {
                for path in created_files(&event) {
                    process_created(&path, handler, detector, cancel);
                }
            }
            Ok(Err(e)) => log::warn!("Watcher error on {}: {}", folder.display(), e),
            Err(RecvTimeoutError::Timeout) => {
                if !folder.is_dir() {
                    return Err(WatchError::TargetUnavailable(folder.to_path_buf()));
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Err(WatchError::ChannelClosed),
        }
    }
}

fn process_created(
    path: &Path,
    handler: &dyn ReadyFileHandler,
    detector: &StabilityDetector,
    cancel: &CancelToken,
) {
    log::info!("New file detected: {}", path.display());

    match detector.await_ready(path, cancel) {
        Ok(Readiness::Ready { size }) => {
            log::debug!("{} stable at {} bytes", path.display(), size);
            handler.on_file_ready(path);
        }
        Ok(Readiness::Cancelled) => {
            log::info!("Abandoned stability wait for {}", path.display());
        }
        Err(e) => log::warn!("Could not read {}: {}", path.display(), e),
    }
}

/// Files (not directories) created by this event
pub fn created_files(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

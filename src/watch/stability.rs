//! Detects when a newly created file has finished being written.
//!
//! A file is ready once two consecutive size samples agree on a positive
//! size, the file opens for reading, and a final re-sample taken after the
//! open still reports that size. Permission and not-found errors are normal
//! while another process is still writing, so they are retried on a
//! shorter interval instead of failing.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::Duration;

use super::cancel::CancelToken;

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
pub const RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// File-system access used by the detector
pub trait FileProbe: Send + Sync {
    fn size(&self, path: &Path) -> io::Result<u64>;
    fn open_for_read(&self, path: &Path) -> io::Result<()>;
}

/// Probe backed by the real file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn open_for_read(&self, path: &Path) -> io::Result<()> {
        File::open(path).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { size: u64 },
    Cancelled,
}

fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied)
}

pub struct StabilityDetector<P: FileProbe = FsProbe> {
    probe: P,
    interval: Duration,
    retry_interval: Duration,
}

impl StabilityDetector<FsProbe> {
    pub fn new() -> Self {
        Self::with_probe(FsProbe, SAMPLE_INTERVAL, RETRY_INTERVAL)
    }
}

impl Default for StabilityDetector<FsProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: FileProbe> StabilityDetector<P> {
    pub fn with_probe(probe: P, interval: Duration, retry_interval: Duration) -> Self {
        Self {
            probe,
            interval,
            retry_interval,
        }
    }

    /// Block until the file is stable. There is no overall timeout; only
    /// `cancel` ends the wait early. Non-transient I/O errors are returned.
    pub fn await_ready(&self, path: &Path, cancel: &CancelToken) -> io::Result<Readiness> {
        let mut last: Option<u64> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(Readiness::Cancelled);
            }

            let wait = match self.probe.size(path) {
                Ok(size) if size > 0 && last == Some(size) => match self.confirm(path, size) {
                    Ok(None) => return Ok(Readiness::Ready { size }),
                    Ok(Some(grown)) => {
                        log::debug!("{} grew to {} bytes while opening", path.display(), grown);
                        last = Some(grown);
                        self.interval
                    }
                    Err(e) if is_transient(&e) => self.retry_interval,
                    Err(e) => return Err(e),
                },
                Ok(size) => {
                    last = Some(size);
                    self.interval
                }
                Err(e) if is_transient(&e) => {
                    log::debug!("{} not ready yet: {}", path.display(), e);
                    self.retry_interval
                }
                Err(e) => return Err(e),
            };

            if !cancel.sleep(wait) {
                return Ok(Readiness::Cancelled);
            }
        }
    }

    /// Open the file and re-sample. `Ok(None)` when the size held, otherwise
    /// the new size.
    fn confirm(&self, path: &Path, size: u64) -> io::Result<Option<u64>> {
        self.probe.open_for_read(path)?;
        let now = self.probe.size(path)?;
        Ok(if now == size { None } else { Some(now) })
    }
}

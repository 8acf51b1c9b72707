pub mod cancel;
pub mod stability;
pub mod supervisor;

pub use cancel::CancelToken;
pub use stability::{FileProbe, FsProbe, Readiness, StabilityDetector};
pub use supervisor::{FolderWatchSupervisor, ReadyFileHandler, WatchError};

//! scanward: decides whether a file or URL is malicious by consulting a
//! local deny-list, a verdict cache and a remote multi-engine aggregator,
//! in that order, and watches folders for new files to feed through the
//! same pipeline.

pub mod activity;
pub mod alert;
pub mod config;
pub mod events;
pub mod pipeline;
pub mod scan;
pub mod watch;

pub use config::Settings;
pub use pipeline::ScanPipeline;
pub use scan::{Origin, Resolution, ScanKey, ScanResolver, Verdict};

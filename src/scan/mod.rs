pub mod types;
pub mod normalizer;
pub mod aggregator;
pub mod store;
pub mod cache;
pub mod denylist;
pub mod resolver;
pub mod digest;

// Re-export commonly used items
pub use types::{
    Category, Counts, Digests, EngineVerdict, KeyKind, Origin, Resolution, ScanKey, Verdict,
};
pub use aggregator::{AggregatorClient, AggregatorError, RemoteAggregator};
pub use cache::{CacheEntry, CacheStore};
pub use denylist::{DenyListEntry, DenyListStore};
pub use resolver::ScanResolver;
pub use digest::{DigestComputer, StreamingDigester};
pub use store::StoreError;

pub mod bus;
pub mod stream;

pub use bus::{EVENT_CAPACITY, EventBus, WatchEvent, WatchEventKind};
pub use stream::{serve_events, stream_events};

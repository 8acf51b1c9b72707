pub mod gate;
pub mod sinks;

pub use gate::{AlertContext, GateDecision, NotificationGate, NotificationMessage};
pub use sinks::{NotificationSink, SinkError, build_sinks};

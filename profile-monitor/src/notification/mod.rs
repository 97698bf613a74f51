//! Notification delivery.
//!
//! Detection code only produces structured [`NotificationEvent`]s; sinks
//! decide how they reach the operator.

pub mod events;
pub mod sink;

pub use events::{NotificationEvent, NotificationPriority, OperatorAlert};
pub use sink::{BroadcastSink, CompositeSink, MemorySink, NotificationSink, TracingSink};

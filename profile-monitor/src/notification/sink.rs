//! Notification sinks.
//!
//! The poll loop emits every event to exactly one [`NotificationSink`];
//! fan-out is done by [`CompositeSink`]. A failing sink never aborts a cycle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::events::{NotificationEvent, NotificationPriority};
use crate::{Error, Result};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &'static str;

    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

/// Writes events to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let priority = event.priority();
        let title = event.title();
        let description = event.description();
        match priority {
            NotificationPriority::Critical => {
                error!(event_type = event.event_type(), %priority, "{}: {}", title, description)
            }
            NotificationPriority::High => {
                warn!(event_type = event.event_type(), %priority, "{}: {}", title, description)
            }
            NotificationPriority::Normal | NotificationPriority::Low => {
                info!(event_type = event.event_type(), %priority, "{}: {}", title, description)
            }
        }
        Ok(())
    }
}

/// Publishes events on a broadcast channel for in-process consumers.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<NotificationEvent>,
}

impl BroadcastSink {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Fans events out to several sinks; one failing sink does not stop the rest.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for CompositeSink {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.send(event).await {
                warn!(sink = sink.name(), error = %e, "Notification sink failed");
                failed.push(sink.name());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "notification failed for sinks: {}",
                failed.join(", ")
            )))
        }
    }
}

/// Keeps every event in memory. Useful for embedding and tests.
#[derive(Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<NotificationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ChangeEvent, EntityKind};

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<()> {
            Err(Error::Other("smtp down".into()))
        }
    }

    fn event() -> NotificationEvent {
        ChangeEvent::value(EntityKind::ProfileName, "u", Some("a".into()), Some("b".into())).into()
    }

    #[tokio::test]
    async fn test_composite_delivers_past_failing_sink() {
        let memory = MemorySink::new();
        let composite = CompositeSink::new()
            .with(Arc::new(FailingSink))
            .with(Arc::new(memory.clone()));

        let result = composite.send(&event()).await;
        assert!(result.is_err());
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastSink::with_capacity(4);
        let mut rx = sink.subscribe();
        let sent = event();
        sink.send(&sent).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let sink = BroadcastSink::new();
        assert!(sink.send(&event()).await.is_ok());
        assert_eq!(sink.subscriber_count(), 0);
    }
}

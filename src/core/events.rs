//! Outbound engine events.
//!
//! Events fan out over a bounded `tokio::sync::broadcast` channel. Publishing never
//! waits: with no subscribers the event is dropped, and a slow subscriber lags and
//! loses the oldest events instead of stalling the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event topics published to the transport collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventTopic {
    RollbackPointCreated,
    RollbackPointExpired,
    RollbackStarted,
    RollbackProgress,
    RollbackCompleted,
    RollbackFailed,
    RollbackCancelled,
    ConflictDetected,
    CleanupStarted,
    CleanupCompleted,
    SyncStarted,
    SyncCompleted,
    SyncFailed,
}

impl EventTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::RollbackPointCreated => "rollback-point-created",
            EventTopic::RollbackPointExpired => "rollback-point-expired",
            EventTopic::RollbackStarted => "rollback-started",
            EventTopic::RollbackProgress => "rollback-progress",
            EventTopic::RollbackCompleted => "rollback-completed",
            EventTopic::RollbackFailed => "rollback-failed",
            EventTopic::RollbackCancelled => "rollback-cancelled",
            EventTopic::ConflictDetected => "conflict-detected",
            EventTopic::CleanupStarted => "cleanup-started",
            EventTopic::CleanupCompleted => "cleanup-completed",
            EventTopic::SyncStarted => "sync-started",
            EventTopic::SyncCompleted => "sync-completed",
            EventTopic::SyncFailed => "sync-failed",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: String,
    pub topic: EventTopic,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(topic: EventTopic, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic,
            payload,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.topic,
            self.payload
        )
    }
}

/// Best-effort event fan-out.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: EngineEvent) -> usize {
        tracing::trace!(topic = %event.topic, "publish event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn emit(&self, topic: EventTopic, payload: Value) -> usize {
        self.publish(EngineEvent::new(topic, payload))
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Drain whatever is already buffered on `rx` without waiting.
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event subscriber lagged");
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        assert_eq!(bus.emit(EventTopic::CleanupStarted, json!({})), 0);
    }

    #[test]
    fn test_topic_wire_names() {
        assert_eq!(EventTopic::RollbackPointCreated.as_str(), "rollback-point-created");
        assert_eq!(
            serde_json::to_value(EventTopic::ConflictDetected).unwrap(),
            json!("conflict-detected")
        );
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(EventTopic::RollbackStarted, json!({"n": 1}));
        bus.emit(EventTopic::RollbackCompleted, json!({"n": 2}));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic, EventTopic::RollbackStarted);
        assert_eq!(events[1].payload["n"], 2);
    }

    #[test]
    fn test_slow_subscriber_never_blocks_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.emit(EventTopic::RollbackProgress, json!({ "progress": i }));
        }
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload["progress"], 9);
    }
}

//! Event bus abstraction for decoupled event emission.
//!
//! The engine reports state changes and overlay text through this trait so
//! it never depends on how (or whether) a UI displays them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Trait for emitting events to subscribers.
///
/// Implementations must return quickly: the engine emits from its event
/// processing path and treats every emission as fire-and-forget.
pub trait EventBus: Send + Sync {
    /// Emit an event with a JSON payload.
    ///
    /// # Arguments
    /// * `topic` - Event name/topic (e.g., "engine:mode_applied")
    /// * `payload` - JSON payload to emit
    fn emit(&self, topic: &str, payload: serde_json::Value);
}

/// Type alias for shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// Serialize `event` and emit it. Events that fail to serialize are dropped.
pub fn emit_event<T: serde::Serialize>(bus: &dyn EventBus, topic: &str, event: &T) {
    if let Ok(payload) = serde_json::to_value(event) {
        bus.emit(topic, payload);
    }
}

/// In-memory event bus for testing.
///
/// Captures all emitted events for later inspection.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<EmittedEvent>>,
}

/// A captured event from InMemoryEventBus.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<EmittedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get all captured events.
    pub fn events(&self) -> Vec<EmittedEvent> {
        self.guard().clone()
    }

    /// Get events for a specific topic.
    pub fn events_for(&self, topic: &str) -> Vec<EmittedEvent> {
        self.guard()
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Deserialize the payloads of a topic.
    pub fn payloads_for<T: serde::de::DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.events_for(topic)
            .into_iter()
            .filter_map(|e| serde_json::from_value(e.payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        self.guard().push(EmittedEvent {
            topic: topic.to_string(),
            payload,
        });
    }
}

/// No-op event bus that discards all events.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _topic: &str, _payload: serde_json::Value) {}
}

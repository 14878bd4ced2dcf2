//! Event bus that writes engine events to the log.

use perfmode_events::{event_names, EventBus};
use serde_json::Value;

/// Logs every event; overlay text goes to stdout so a terminal shows it.
pub struct LogEventBus {
    print_overlay: bool,
}

impl LogEventBus {
    pub fn new(print_overlay: bool) -> Self {
        Self { print_overlay }
    }
}

impl EventBus for LogEventBus {
    fn emit(&self, topic: &str, payload: Value) {
        if topic == event_names::OVERLAY_STATUS && self.print_overlay {
            if let Some(text) = payload.get("text").and_then(Value::as_str) {
                println!("{text}\n");
            }
            return;
        }
        tracing::debug!(topic, %payload, "engine event");
    }
}

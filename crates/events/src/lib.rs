//! Shared event contracts for the perfmode engine.
//!
//! This crate defines the DTOs the engine publishes for external consumers
//! (debug overlay, status UI, logs). Using shared types prevents runtime
//! deserialization errors from mismatched field names.
//!
//! Also provides the `EventBus` trait for decoupled event emission.

mod bus;

pub use bus::{emit_event, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};

use serde::{Deserialize, Serialize};

/// Lifecycle state of the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Created, never activated.
    #[default]
    Uninitialized,
    /// Creating directories, loading policy, subscribing to events.
    Initializing,
    /// Processing foreground changes.
    Running,
    /// Initialization failed; a retry is scheduled.
    Degraded,
    /// Deactivated.
    Stopped,
}

impl EngineState {
    pub fn label(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Running => "running",
            EngineState::Degraded => "degraded",
            EngineState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Event emitted when the engine changes lifecycle state.
///
/// Producers: engine supervisor
/// Consumers: status UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStateEvent {
    pub state: EngineState,
    /// Why the state was entered (set for `Degraded`).
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Event emitted after a mode was written to the control surface.
///
/// Producers: engine event processing
/// Consumers: status UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeAppliedEvent {
    /// Foreground package that caused the change.
    pub package: String,
    /// Mode now active on the control surface.
    pub mode: String,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Event emitted after the policy document was reloaded.
///
/// Producers: config watcher
/// Consumers: status UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReloadedEvent {
    pub default_mode: String,
    /// Mode names defined by the document, sorted.
    pub modes: Vec<String>,
    /// Total package assignments.
    pub assignments: usize,
    pub floating_window: bool,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Human-readable debug status for the floating overlay.
///
/// Producers: engine event processing
/// Consumers: overlay renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayStatusEvent {
    /// Previously committed package.
    pub previous: String,
    /// Package reported by the transition.
    pub current: String,
    /// Committed package after filtering.
    pub effective: String,
    /// Mode resolved for `effective`.
    pub mode: String,
    /// Whether `effective` is a launcher/home app.
    #[serde(default)]
    pub home_app: bool,
    /// Preformatted text for display.
    pub text: String,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Tells the overlay renderer to show or release the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayVisibilityEvent {
    pub visible: bool,
}

/// Wall-clock timestamp for event payloads.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Engine lifecycle state changed.
    pub const ENGINE_STATE: &str = "engine:state";
    /// Mode written to the control surface.
    pub const MODE_APPLIED: &str = "engine:mode_applied";
    /// Policy document reloaded.
    pub const CONFIG_RELOADED: &str = "engine:config_reloaded";
    /// Overlay debug text.
    pub const OVERLAY_STATUS: &str = "overlay:status";
    /// Overlay show/release.
    pub const OVERLAY_VISIBILITY: &str = "overlay:visibility";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_serializes_lowercase() {
        let json = serde_json::to_string(&EngineState::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }

    #[test]
    fn test_state_event_deserialize_minimal() {
        let json = r#"{"state": "running"}"#;
        let event: EngineStateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.state, EngineState::Running);
        assert_eq!(event.reason, None);
        assert_eq!(event.timestamp_ms, 0);
    }

    #[test]
    fn test_overlay_status_defaults() {
        let json = r#"{"previous": "a", "current": "b", "effective": "b", "mode": "fast", "text": "x"}"#;
        let event: OverlayStatusEvent = serde_json::from_str(json).unwrap();
        assert!(!event.home_app);
        assert_eq!(event.mode, "fast");
    }
}

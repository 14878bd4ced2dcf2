//! Foreground event source capability.
//!
//! The platform mechanism that reports window focus changes (accessibility
//! events, compositor IPC, a test harness) sits behind
//! [`ForegroundEventSource`]. The engine only subscribes and unsubscribes.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

/// A raw foreground-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundTransition {
    /// Package that owns the focused window (e.g. "com.example.game").
    pub package_id: String,
    /// Milliseconds since process start.
    pub timestamp_monotonic: u64,
    /// Class name of the window that produced the event.
    pub source_class: String,
}

impl ForegroundTransition {
    /// Transition stamped with the current monotonic time.
    pub fn new(package_id: impl Into<String>, source_class: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            timestamp_monotonic: monotonic_ms(),
            source_class: source_class.into(),
        }
    }
}

/// Milliseconds elapsed since the first call in this process.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Callback type for delivered transitions.
pub type TransitionCallback = Arc<dyn Fn(ForegroundTransition) + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("event source unavailable: {0}")]
    Unavailable(String),

    #[error("event source already has a subscriber")]
    AlreadySubscribed,
}

/// Provider of foreground-change notifications.
///
/// Implementations may invoke the callback from any thread. Dropping the
/// callback ends the subscription's stream.
pub trait ForegroundEventSource: Send + Sync {
    fn subscribe(&self, callback: TransitionCallback) -> Result<(), SourceError>;

    fn unsubscribe(&self);
}

/// Type alias for shared event source reference.
pub type EventSourceRef = Arc<dyn ForegroundEventSource>;

/// Event source fed by the host through [`ChannelEventSource::push`].
#[derive(Default)]
pub struct ChannelEventSource {
    callback: Mutex<Option<TransitionCallback>>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Option<TransitionCallback>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a transition. Returns false when nobody is subscribed.
    pub fn push(&self, package_id: impl Into<String>, source_class: impl Into<String>) -> bool {
        self.push_transition(ForegroundTransition::new(package_id, source_class))
    }

    pub fn push_transition(&self, transition: ForegroundTransition) -> bool {
        let callback = self.guard().clone();
        match callback {
            Some(callback) => {
                callback(transition);
                true
            }
            None => {
                tracing::trace!(package = %transition.package_id, "no subscriber, transition dropped");
                false
            }
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.guard().is_some()
    }
}

impl ForegroundEventSource for ChannelEventSource {
    fn subscribe(&self, callback: TransitionCallback) -> Result<(), SourceError> {
        let mut slot = self.guard();
        if slot.is_some() {
            return Err(SourceError::AlreadySubscribed);
        }
        *slot = Some(callback);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.guard().take();
    }
}

impl std::fmt::Debug for ChannelEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEventSource")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_push_without_subscriber() {
        let source = ChannelEventSource::new();
        assert!(!source.push("com.a", "Normal"));
    }

    #[test]
    fn test_subscribe_push_unsubscribe() {
        let source = ChannelEventSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        source
            .subscribe(Arc::new(move |t: ForegroundTransition| {
                assert_eq!(t.package_id, "com.a");
                count_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(source.push("com.a", "Normal"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        source.unsubscribe();
        assert!(!source.is_subscribed());
        assert!(!source.push("com.a", "Normal"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_subscriber_rejected() {
        let source = ChannelEventSource::new();
        source.subscribe(Arc::new(|_: ForegroundTransition| {})).unwrap();
        assert!(matches!(
            source.subscribe(Arc::new(|_: ForegroundTransition| {})),
            Err(SourceError::AlreadySubscribed)
        ));
    }

    #[test]
    fn test_monotonic_timestamps() {
        let first = ForegroundTransition::new("com.a", "");
        let second = ForegroundTransition::new("com.b", "");
        assert!(second.timestamp_monotonic >= first.timestamp_monotonic);
    }
}

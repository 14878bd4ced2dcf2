//! Overlay status text for the debug overlay.

use perfmode_events::{now_ms, OverlayStatusEvent};

/// Format the human-readable status shown by the overlay.
pub fn format_status(previous: &str, current: &str, effective: &str, mode: &str, home_app: bool) -> String {
    let mut text = format!(
        "previous: {previous}\ncurrent: {current}\neffective: {effective}\nmode: {mode}"
    );
    if home_app {
        text.push_str("\n(home)");
    }
    text
}

/// Build the overlay status event for one handled transition.
pub fn status_event(
    previous: &str,
    current: &str,
    effective: &str,
    mode: &str,
    home_app: bool,
) -> OverlayStatusEvent {
    OverlayStatusEvent {
        previous: previous.to_string(),
        current: current.to_string(),
        effective: effective.to_string(),
        mode: mode.to_string(),
        home_app,
        text: format_status(previous, current, effective, mode, home_app),
        timestamp_ms: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status() {
        let text = format_status("com.a", "com.b", "com.b", "fast", false);
        assert_eq!(text, "previous: com.a\ncurrent: com.b\neffective: com.b\nmode: fast");
    }

    #[test]
    fn test_format_status_home() {
        let text = format_status("com.a", "com.android.launcher3", "com.android.launcher3", "powersave", true);
        assert!(text.ends_with("\n(home)"));
    }

    #[test]
    fn test_status_event_fields() {
        let event = status_event("com.a", "com.b", "com.a", "fast", false);
        assert_eq!(event.current, "com.b");
        assert_eq!(event.effective, "com.a");
        assert!(event.text.contains("mode: fast"));
        assert!(event.timestamp_ms > 0);
    }
}

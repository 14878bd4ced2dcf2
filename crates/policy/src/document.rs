//! Policy document format.
//!
//! ```json
//! {
//!   "default": "balance",
//!   "floatingWindow": false,
//!   "fast": ["com.example.game"],
//!   "powersave": ["com.example.reader"]
//! }
//! ```
//!
//! Every top-level array of strings is a mode. Any other key is kept as-is so
//! external tooling can store its own data next to the policy.

use crate::error::{ConfigError, Result};
use crate::snapshot::{PolicySnapshot, FALLBACK_MODE};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Key holding the default mode name.
pub const DEFAULT_KEY: &str = "default";

/// Key holding the overlay flag.
pub const FLOATING_WINDOW_KEY: &str = "floatingWindow";

/// Parse a policy document.
///
/// Only input that is not a JSON object is rejected. A badly typed `default`
/// or `floatingWindow` falls back to its default value on its own, so the
/// mode lists survive. A package listed under several modes ends up in the
/// mode that appears last in the document.
pub fn parse_document(bytes: &[u8]) -> Result<PolicySnapshot> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(object) = value else {
        return Err(ConfigError::Malformed(
            "document root is not an object".to_string(),
        ));
    };

    let default_mode = match object.get(DEFAULT_KEY) {
        None => FALLBACK_MODE.to_string(),
        Some(Value::String(mode)) if !mode.trim().is_empty() => mode.trim().to_string(),
        Some(other) => {
            tracing::warn!(value = %other, fallback = FALLBACK_MODE, "default mode is not a non-empty string");
            FALLBACK_MODE.to_string()
        }
    };

    let floating_window = match object.get(FLOATING_WINDOW_KEY) {
        None => false,
        Some(Value::Bool(enabled)) => *enabled,
        Some(other) => {
            tracing::warn!(value = %other, "floatingWindow is not a bool, overlay disabled");
            false
        }
    };

    let mut modes: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut extra = Map::new();

    for (key, value) in &object {
        if key == DEFAULT_KEY || key == FLOATING_WINDOW_KEY {
            continue;
        }
        match as_package_list(value) {
            Some(packages) => modes.push((key.as_str(), packages)),
            None => {
                extra.insert(key.clone(), value.clone());
            }
        }
    }

    // Last write wins for packages listed under more than one mode
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (index, (_, packages)) in modes.iter().enumerate() {
        for package in packages {
            if let Some(previous) = owner.insert(*package, index) {
                if previous != index {
                    tracing::warn!(
                        package = %package,
                        dropped = %modes[previous].0,
                        kept = %modes[index].0,
                        "package listed under several modes"
                    );
                }
            }
        }
    }

    let mut snapshot = PolicySnapshot::new(default_mode).with_floating_window(floating_window);
    for (index, (mode, packages)) in modes.iter().enumerate() {
        let kept = packages
            .iter()
            .filter(|package| owner.get(*package) == Some(&index))
            .copied();
        snapshot = snapshot.with_members(*mode, kept);
    }
    for (key, value) in extra {
        snapshot = snapshot.with_extra(key, value);
    }

    Ok(snapshot)
}

/// Render a snapshot as a pretty-printed document.
pub fn render_document(snapshot: &PolicySnapshot) -> Result<Vec<u8>> {
    let mut object = Map::new();
    object.insert(
        DEFAULT_KEY.to_string(),
        Value::String(snapshot.default_mode().to_string()),
    );
    object.insert(
        FLOATING_WINDOW_KEY.to_string(),
        Value::Bool(snapshot.floating_window()),
    );

    for (mode, members) in snapshot.mode_members() {
        let packages = members.iter().cloned().map(Value::String).collect();
        object.insert(mode.clone(), Value::Array(packages));
    }

    for (key, value) in snapshot.extra() {
        object.entry(key.clone()).or_insert_with(|| value.clone());
    }

    Ok(serde_json::to_vec_pretty(&Value::Object(object))?)
}

/// Package identifiers of a mode array, or `None` if `value` is not one.
fn as_package_list(value: &Value) -> Option<Vec<&str>> {
    let Value::Array(items) = value else {
        return None;
    };
    items
        .iter()
        .map(|item| item.as_str())
        .collect::<Option<Vec<_>>>()
        .map(|packages| {
            packages
                .into_iter()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_document() {
        let doc = br#"{
            "default": "balance",
            "floatingWindow": true,
            "fast": ["com.a", "com.b"],
            "powersave": ["com.c"]
        }"#;

        let snapshot = parse_document(doc).unwrap();
        assert_eq!(snapshot.default_mode(), "balance");
        assert!(snapshot.floating_window());
        assert_eq!(snapshot.members("fast").unwrap().len(), 2);
        assert!(snapshot.members("powersave").unwrap().contains("com.c"));
    }

    #[test]
    fn test_missing_arrays_are_empty() {
        let snapshot = parse_document(br#"{"default": "fast"}"#).unwrap();
        assert_eq!(snapshot.default_mode(), "fast");
        assert!(snapshot.mode_members().is_empty());
        assert!(!snapshot.floating_window());
    }

    #[test]
    fn test_duplicate_package_last_write_wins() {
        let doc = br#"{"default": "powersave", "performance": ["com.a"], "balance": ["com.a"]}"#;
        let snapshot = parse_document(doc).unwrap();

        assert!(snapshot.members("balance").unwrap().contains("com.a"));
        assert!(snapshot.members("performance").unwrap().is_empty());
        assert_eq!(snapshot.assignment_count(), 1);
    }

    #[test]
    fn test_extra_keys_preserved() {
        let doc = br#"{"default": "fast", "version": 3, "notes": {"owner": "ops"}, "fast": []}"#;
        let snapshot = parse_document(doc).unwrap();
        assert_eq!(snapshot.extra().get("version"), Some(&json!(3)));

        let rendered: Value = serde_json::from_slice(&render_document(&snapshot).unwrap()).unwrap();
        assert_eq!(rendered["version"], json!(3));
        assert_eq!(rendered["notes"]["owner"], json!("ops"));
        assert_eq!(rendered["fast"], json!([]));
    }

    #[test]
    fn test_non_string_array_is_extra() {
        let doc = br#"{"default": "fast", "thresholds": [1, 2, 3]}"#;
        let snapshot = parse_document(doc).unwrap();
        assert!(snapshot.members("thresholds").is_none());
        assert_eq!(snapshot.extra().get("thresholds"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(parse_document(b"not json"), Err(ConfigError::Parse(_))));
        assert!(matches!(parse_document(b"[1, 2]"), Err(ConfigError::Malformed(_))));
        assert!(matches!(parse_document(b"\"fast\""), Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn test_badly_typed_fields_fall_back_individually() {
        let doc = br#"{"default": "balance", "floatingWindow": "true", "fast": ["com.game"], "owner": "ops"}"#;
        let snapshot = parse_document(doc).unwrap();
        assert_eq!(snapshot.default_mode(), "balance");
        assert!(!snapshot.floating_window());
        assert!(snapshot.members("fast").unwrap().contains("com.game"));
        assert_eq!(snapshot.extra().get("owner"), Some(&json!("ops")));

        let snapshot = parse_document(br#"{"default": 5, "floatingWindow": true, "fast": ["com.a"]}"#).unwrap();
        assert_eq!(snapshot.default_mode(), FALLBACK_MODE);
        assert!(snapshot.floating_window());
        assert_eq!(snapshot.assignment_count(), 1);

        let snapshot = parse_document(br#"{"default": "  "}"#).unwrap();
        assert_eq!(snapshot.default_mode(), FALLBACK_MODE);
    }

    #[test]
    fn test_render_is_reparseable() {
        let snapshot = PolicySnapshot::new("balance")
            .with_members("fast", ["com.a"])
            .with_floating_window(true);

        let reparsed = parse_document(&render_document(&snapshot).unwrap()).unwrap();
        assert_eq!(reparsed, snapshot);
    }
}

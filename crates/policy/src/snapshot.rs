//! Policy snapshot.
//!
//! Pure domain data - no I/O. A snapshot is never mutated once handed out;
//! edits produce a new snapshot.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Default mode used when no valid policy document exists.
pub const FALLBACK_MODE: &str = "powersave";

/// Immutable view of the policy document.
///
/// Mode names are whatever the document defines; the default mode is always
/// a valid mode name even when no package is assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    default_mode: String,
    mode_members: BTreeMap<String, BTreeSet<String>>,
    floating_window: bool,
    /// Top-level document keys this crate does not interpret.
    extra: Map<String, Value>,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self::new(FALLBACK_MODE)
    }
}

impl PolicySnapshot {
    /// Empty snapshot with the given default mode and the overlay disabled.
    pub fn new(default_mode: impl Into<String>) -> Self {
        Self {
            default_mode: default_mode.into(),
            mode_members: BTreeMap::new(),
            floating_window: false,
            extra: Map::new(),
        }
    }

    /// Add packages to a mode's member set, creating the mode if needed.
    ///
    /// Does not remove the packages from other modes. Use
    /// [`PolicySnapshot::with_assignment`] to move a single package.
    pub fn with_members<I, S>(mut self, mode: impl Into<String>, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mode_members
            .entry(mode.into())
            .or_default()
            .extend(packages.into_iter().map(Into::into));
        self
    }

    pub fn with_floating_window(mut self, enabled: bool) -> Self {
        self.floating_window = enabled;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Copy of this snapshot with `package` moved to `mode`.
    ///
    /// The package is removed from every mode first. It is only re-added when
    /// `mode` is non-empty and differs from the default mode, since an
    /// unassigned package already resolves to the default.
    pub fn with_assignment(&self, package: &str, mode: &str) -> Self {
        let mut next = self.clone();
        for members in next.mode_members.values_mut() {
            members.remove(package);
        }
        if !mode.is_empty() && mode != next.default_mode {
            next.mode_members
                .entry(mode.to_string())
                .or_default()
                .insert(package.to_string());
        }
        next
    }

    pub fn default_mode(&self) -> &str {
        &self.default_mode
    }

    pub fn floating_window(&self) -> bool {
        self.floating_window
    }

    /// Mode name → member packages, ordered by mode name.
    pub fn mode_members(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.mode_members
    }

    pub fn members(&self, mode: &str) -> Option<&BTreeSet<String>> {
        self.mode_members.get(mode)
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Whether `mode` names a mode of this snapshot.
    pub fn is_valid_mode(&self, mode: &str) -> bool {
        mode == self.default_mode || self.mode_members.contains_key(mode)
    }

    /// Number of package assignments across all modes.
    pub fn assignment_count(&self) -> usize {
        self.mode_members.values().map(BTreeSet::len).sum()
    }
}

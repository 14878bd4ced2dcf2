//! Foreground event filter.
//!
//! Turns raw transitions into committed foreground changes. Pure state
//! machine - no I/O.

use crate::settings::EngineSettings;
use crate::source::ForegroundTransition;
use std::collections::HashSet;

/// Committed package before the first real transition.
pub const UNKNOWN_PACKAGE: &str = "unknown";

/// Which transitions count as noise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRules {
    pub noise_classes: HashSet<String>,
    pub noise_packages: HashSet<String>,
    pub ignored_packages: HashSet<String>,
    pub system_package: Option<String>,
}

impl FilterRules {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            noise_classes: settings.noise_classes.iter().cloned().collect(),
            noise_packages: settings.noise_packages.iter().cloned().collect(),
            ignored_packages: settings.ignored_packages.iter().cloned().collect(),
            system_package: settings.system_package.clone(),
        }
    }
}

/// Why a transition was classified as noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseReason {
    /// Window class is an IME window or a generic container.
    SourceClass,
    /// Package is configured as noise (input methods).
    NoisePackage,
    /// Package is the platform's own system package.
    SystemPackage,
}

/// A committed change of the foreground package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedChange {
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// The foreground package changed.
    Committed(CommittedChange),
    /// Same package as the committed one.
    Duplicate,
    /// Spurious transition; the committed package is kept.
    Noise(NoiseReason),
    /// Empty or ignored package.
    Ignored,
}

/// Tracks the effective foreground package.
#[derive(Debug, Clone)]
pub struct ForegroundFilter {
    rules: FilterRules,
    current: String,
    previous: String,
}

impl ForegroundFilter {
    pub fn new(rules: FilterRules) -> Self {
        Self {
            rules,
            current: UNKNOWN_PACKAGE.to_string(),
            previous: UNKNOWN_PACKAGE.to_string(),
        }
    }

    /// Currently committed foreground package.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Package committed before the current one.
    pub fn previous(&self) -> &str {
        &self.previous
    }

    /// Classify a transition, committing it when it is a real change.
    ///
    /// Never commits the same package twice in a row.
    pub fn observe(&mut self, transition: &ForegroundTransition) -> FilterDecision {
        let candidate = transition.package_id.trim();

        if candidate.is_empty() || self.rules.ignored_packages.contains(candidate) {
            return FilterDecision::Ignored;
        }
        if self.rules.noise_classes.contains(transition.source_class.as_str()) {
            return FilterDecision::Noise(NoiseReason::SourceClass);
        }
        if self.rules.noise_packages.contains(candidate) {
            return FilterDecision::Noise(NoiseReason::NoisePackage);
        }
        if self.rules.system_package.as_deref() == Some(candidate) {
            return FilterDecision::Noise(NoiseReason::SystemPackage);
        }
        if candidate == self.current {
            return FilterDecision::Duplicate;
        }

        self.previous = std::mem::replace(&mut self.current, candidate.to_string());
        FilterDecision::Committed(CommittedChange {
            previous: self.previous.clone(),
            current: self.current.clone(),
        })
    }
}

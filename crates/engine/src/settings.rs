//! Engine settings.
//!
//! Centralizes paths, retry timing and the noise-filter lists.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delay before re-entering initialization after a failure.
pub const DEFAULT_INIT_RETRY: Duration = Duration::from_secs(3);

/// Delay between config watcher setup attempts.
pub const DEFAULT_WATCH_RETRY: Duration = Duration::from_secs(5);

/// Upper bound for a single config or control-surface I/O call.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between control-surface write attempts.
pub const DEFAULT_APPLY_RETRY: Duration = Duration::from_millis(250);

/// Write attempts per mode change.
pub const DEFAULT_APPLY_ATTEMPTS: u32 = 3;

/// Window classes that never represent an application switch.
pub const DEFAULT_NOISE_CLASSES: &[&str] = &[
    "android.inputmethodservice.SoftInputWindow",
    "android.widget.FrameLayout",
];

/// Overlay packages whose events are dropped entirely.
pub const DEFAULT_IGNORED_PACKAGES: &[&str] = &["com.omarea.gesture", "com.omarea.filter"];

/// Package id of the platform itself.
pub const DEFAULT_SYSTEM_PACKAGE: &str = "android";

/// Launchers reported as home apps in overlay status.
pub const DEFAULT_HOME_PACKAGES: &[&str] = &[
    "com.android.launcher3",
    "com.google.android.apps.nexuslauncher",
    "com.miui.home",
];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Engine configuration. Every field has a default, so a settings file only
/// needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Policy document.
    pub config_path: PathBuf,
    /// Control surface read by the scheduler.
    pub control_path: PathBuf,
    pub init_retry_ms: u64,
    pub watch_retry_ms: u64,
    pub io_timeout_ms: u64,
    pub apply_attempts: u32,
    pub apply_retry_ms: u64,
    pub noise_classes: Vec<String>,
    /// Packages treated as noise whatever their window class (input methods).
    pub noise_packages: Vec<String>,
    pub ignored_packages: Vec<String>,
    /// Platform package whose transitions are noise. `None` disables the rule.
    pub system_package: Option<String>,
    pub home_packages: Vec<String>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Directory holding the default policy document and control file.
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("perfmode")
}

impl Default for EngineSettings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            config_path: data_dir.join("app_config.json"),
            control_path: data_dir.join("mode.txt"),
            init_retry_ms: DEFAULT_INIT_RETRY.as_millis() as u64,
            watch_retry_ms: DEFAULT_WATCH_RETRY.as_millis() as u64,
            io_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            apply_attempts: DEFAULT_APPLY_ATTEMPTS,
            apply_retry_ms: DEFAULT_APPLY_RETRY.as_millis() as u64,
            noise_classes: owned(DEFAULT_NOISE_CLASSES),
            noise_packages: Vec::new(),
            ignored_packages: owned(DEFAULT_IGNORED_PACKAGES),
            system_package: Some(DEFAULT_SYSTEM_PACKAGE.to_string()),
            home_packages: owned(DEFAULT_HOME_PACKAGES),
        }
    }
}

impl EngineSettings {
    /// Read settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let bytes = std::fs::read(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn init_retry(&self) -> Duration {
        Duration::from_millis(self.init_retry_ms)
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_millis(self.watch_retry_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn apply_retry(&self) -> Duration {
        Duration::from_millis(self.apply_retry_ms)
    }

    /// Directories that must exist before the engine runs.
    pub fn required_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = [&self.config_path, &self.control_path]
            .into_iter()
            .filter_map(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .collect();
        dirs.dedup();
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.init_retry(), Duration::from_secs(3));
        assert_eq!(settings.watch_retry(), Duration::from_secs(5));
        assert_eq!(settings.system_package.as_deref(), Some("android"));
        assert!(settings
            .noise_classes
            .iter()
            .any(|c| c == "android.inputmethodservice.SoftInputWindow"));
        assert!(settings.config_path.ends_with("perfmode/app_config.json"));
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"control_path": "/tmp/mode.txt", "system_package": null, "apply_attempts": 5}"#,
        )
        .unwrap();

        let settings = EngineSettings::from_file(&path).unwrap();
        assert_eq!(settings.control_path, PathBuf::from("/tmp/mode.txt"));
        assert_eq!(settings.system_package, None);
        assert_eq!(settings.apply_attempts, 5);
        assert_eq!(settings.init_retry_ms, 3000);
    }

    #[test]
    fn test_invalid_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();

        assert!(matches!(
            EngineSettings::from_file(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_required_directories_dedup() {
        let settings = EngineSettings {
            config_path: PathBuf::from("/data/perfmode/app_config.json"),
            control_path: PathBuf::from("/data/perfmode/mode.txt"),
            ..EngineSettings::default()
        };
        assert_eq!(
            settings.required_directories(),
            vec![PathBuf::from("/data/perfmode")]
        );
    }
}

//! Config store - loads and persists the policy document.

use crate::document::{parse_document, render_document};
use crate::error::{ConfigError, Result};
use crate::files::FileAccessRef;
use crate::snapshot::PolicySnapshot;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loads and saves the policy document at a fixed path.
pub struct ConfigStore {
    path: PathBuf,
    files: FileAccessRef,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, files: FileAccessRef) -> Self {
        Self {
            path: path.into(),
            files,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current document.
    ///
    /// An absent or malformed document is replaced by the default snapshot,
    /// which is also written back so the next run finds a valid document.
    /// Fails only when the document exists but cannot be read; it is not
    /// overwritten in that case.
    pub fn load(&self) -> Result<PolicySnapshot> {
        let bytes = match self.files.read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "policy document missing, writing defaults");
                return Ok(self.restore_defaults());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match parse_document(&bytes) {
            Ok(snapshot) => {
                debug!(
                    path = %self.path.display(),
                    default_mode = %snapshot.default_mode(),
                    assignments = snapshot.assignment_count(),
                    "policy document loaded"
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "policy document malformed, writing defaults");
                Ok(self.restore_defaults())
            }
        }
    }

    /// Re-read the document after an external change.
    ///
    /// Unlike [`ConfigStore::load`], a malformed document is an error and is
    /// left on disk: it is usually an edit still in progress. A removed
    /// document is replaced by defaults as in `load`.
    pub fn reload(&self) -> Result<PolicySnapshot> {
        let bytes = match self.files.read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "policy document removed, writing defaults");
                return Ok(self.restore_defaults());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let snapshot = parse_document(&bytes)?;
        debug!(
            path = %self.path.display(),
            default_mode = %snapshot.default_mode(),
            assignments = snapshot.assignment_count(),
            "policy document reloaded"
        );
        Ok(snapshot)
    }

    /// Write the full snapshot, creating the parent directory if needed.
    pub fn save(&self, snapshot: &PolicySnapshot) -> Result<()> {
        let bytes = render_document(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.files
                .create_dir_all(parent)
                .map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        self.files
            .write(&self.path, &bytes)
            .map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), "policy document saved");
        Ok(())
    }

    /// Assign `package` to `mode` and persist the result.
    ///
    /// Assigning the default mode (or an empty mode) removes the package from
    /// every explicit mode list.
    pub fn update_app_mode(&self, package: &str, mode: &str) -> Result<PolicySnapshot> {
        let next = self.load()?.with_assignment(package, mode);
        self.save(&next)?;
        info!(package, mode, "app mode updated");
        Ok(next)
    }

    fn restore_defaults(&self) -> PolicySnapshot {
        let snapshot = PolicySnapshot::default();
        if let Err(e) = self.save(&snapshot) {
            warn!(error = %e, "failed to persist default policy document");
        }
        snapshot
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("files", &"FileAccessRef")
            .finish()
    }
}

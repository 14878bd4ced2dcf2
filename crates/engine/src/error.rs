use crate::source::SourceError;
use perfmode_policy::ConfigError;
use std::path::PathBuf;

/// Failure of one initialization step. The engine reports it, enters
/// `Degraded` and retries.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to create {}: {message}", path.display())]
    Directories { path: PathBuf, message: String },

    #[error("failed to load policy: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to subscribe to foreground events: {0}")]
    Subscribe(#[from] SourceError),

    #[error("initialization task failed: {0}")]
    Task(String),
}

impl InitError {
    /// Initialization step that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            InitError::Directories { .. } => "directories",
            InitError::Config(_) | InitError::Task(_) => "config",
            InitError::Subscribe(_) => "subscribe",
        }
    }
}

//! Mode applier - writes the resolved mode to the control surface.
//!
//! Writes are suppressed when the mode equals the last value actually
//! persisted. A failed write leaves that value stale so the next differing
//! resolution tries again. A write that timed out or aborted may still land
//! later, so the last value is forgotten and the next resolution always writes.

use crate::bounded::{run_bounded, BoundedError};
use crate::settings::EngineSettings;
use perfmode_policy::FileAccessRef;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Last-written mode before the first successful write.
pub const UNKNOWN_MODE: &str = "unknown";

/// Retry and timeout policy for control-surface writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyPolicy {
    /// Write attempts per `apply` call (at least one).
    pub attempts: u32,
    pub retry_delay: Duration,
    pub io_timeout: Duration,
}

impl ApplyPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            attempts: settings.apply_attempts,
            retry_delay: settings.apply_retry(),
            io_timeout: settings.io_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("control surface write failed: {0}")]
    Write(String),

    #[error("control surface write timed out after {0:?}")]
    Timeout(Duration),

    #[error("control surface write aborted: {0}")]
    Aborted(String),

    #[error("superseded by a newer write")]
    Superseded,

    #[error("apply cancelled")]
    Cancelled,
}

impl ApplyError {
    /// Whether the control surface may hold a value other than the last
    /// confirmed write.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ApplyError::Timeout(_) | ApplyError::Aborted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Mode written to the control surface.
    Applied,
    /// Mode already active, no I/O performed.
    Skipped,
    Failed(ApplyError),
}

/// Serializes writes and lets a late write detect that it was superseded.
#[derive(Debug, Default)]
struct WriteGate {
    lock: Mutex<()>,
    generation: AtomicU64,
}

/// Owns the last-written mode and the control-surface path.
pub struct ModeApplier {
    control_path: PathBuf,
    files: FileAccessRef,
    policy: ApplyPolicy,
    last_written: String,
    writes: usize,
    gate: Arc<WriteGate>,
}

impl ModeApplier {
    pub fn new(control_path: impl Into<PathBuf>, files: FileAccessRef, policy: ApplyPolicy) -> Self {
        Self {
            control_path: control_path.into(),
            files,
            policy,
            last_written: UNKNOWN_MODE.to_string(),
            writes: 0,
            gate: Arc::new(WriteGate::default()),
        }
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    /// The last mode persisted to the control surface.
    pub fn last_written_mode(&self) -> &str {
        &self.last_written
    }

    /// Successful control-surface writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Write `mode` unless it is already the last written value.
    ///
    /// Retries failed writes up to the policy's attempt count. The wait
    /// between attempts ends early when `cancel` fires.
    pub async fn apply(&mut self, mode: &str, cancel: &CancellationToken) -> ApplyOutcome {
        if mode == self.last_written {
            debug!(mode, "mode already active, write skipped");
            return ApplyOutcome::Skipped;
        }

        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self.write_once(mode).await;
            if let Err(e) = &result {
                if e.is_indeterminate() && self.last_written != UNKNOWN_MODE {
                    debug!(previous = %self.last_written, error = %e, "control surface state unknown");
                    self.last_written = UNKNOWN_MODE.to_string();
                }
            }
            match result {
                Ok(()) => {
                    self.last_written = mode.to_string();
                    self.writes += 1;
                    info!(mode, attempt, "mode applied");
                    return ApplyOutcome::Applied;
                }
                Err(e) if attempt >= attempts => {
                    warn!(mode, attempts, error = %e, "failed to apply mode");
                    return ApplyOutcome::Failed(e);
                }
                Err(e) => {
                    debug!(mode, attempt, error = %e, "control surface write failed, retrying");
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(mode, "apply cancelled during retry wait");
                    return ApplyOutcome::Failed(ApplyError::Cancelled);
                }
                _ = tokio::time::sleep(self.policy.retry_delay) => {}
            }
            attempt += 1;
        }
    }

    async fn write_once(&self, mode: &str) -> Result<(), ApplyError> {
        let generation = self.gate.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = Arc::clone(&self.gate);
        let files = Arc::clone(&self.files);
        let path = self.control_path.clone();
        let contents = mode.as_bytes().to_vec();

        let result = run_bounded(self.policy.io_timeout, move || {
            let _held = gate.lock.lock().unwrap_or_else(PoisonError::into_inner);
            // A write that timed out may only get here after a newer one was issued.
            if gate.generation.load(Ordering::SeqCst) != generation {
                return Ok(false);
            }
            files.write(&path, &contents).map(|()| true)
        })
        .await;

        match result {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ApplyError::Superseded),
            Ok(Err(e)) => Err(ApplyError::Write(e.to_string())),
            Err(BoundedError::TimedOut(limit)) => Err(ApplyError::Timeout(limit)),
            Err(BoundedError::Join(message)) => Err(ApplyError::Aborted(message)),
        }
    }
}

impl std::fmt::Debug for ModeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeApplier")
            .field("control_path", &self.control_path)
            .field("last_written", &self.last_written)
            .field("writes", &self.writes)
            .finish()
    }
}

//! Config watcher for policy hot reloading.
//!
//! Watches the policy document's directory and reloads the document through
//! the [`ConfigStore`] whenever the file is created, modified, renamed or
//! removed. A document that does not parse keeps the current policy and is
//! left untouched for the editor to finish. Setup failures (directory missing, inotify limits) are retried
//! on a timer until the watcher is stopped.
//!
//! ```text
//!   notify thread                 watcher task
//!  ┌───────────────┐  trigger   ┌──────────────────────────────┐
//!  │ fs event      │ ─────────► │ settle, drain queued         │
//!  │ (name match)  │  (mpsc)    │ triggers, bounded reload()   │
//!  └───────────────┘            │ ──► ReloadCallback(snapshot) │
//!                               └──────────────────────────────┘
//! ```

use crate::bounded::{run_bounded, BoundedError};
use crate::settings::EngineSettings;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use perfmode_policy::{ConfigStore, PolicySnapshot};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Quiet period after a trigger before the document is read.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);

/// Callback for reloaded snapshots.
pub type ReloadCallback = Arc<dyn Fn(PolicySnapshot) + Send + Sync + 'static>;

/// Error types for config watcher setup.
#[derive(Debug, thiserror::Error)]
pub enum WatchSetupError {
    #[error("failed to create watcher: {0}")]
    Create(String),

    #[error("failed to watch {}: {message}", path.display())]
    Watch { path: PathBuf, message: String },

    #[error("config path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Delay between setup attempts.
    pub retry_delay: Duration,
    /// Upper bound for one reload.
    pub io_timeout: Duration,
    pub settle: Duration,
}

impl WatchOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            retry_delay: settings.watch_retry(),
            io_timeout: settings.io_timeout(),
            settle: DEFAULT_SETTLE,
        }
    }
}

/// Background watcher bound to one config store.
pub struct ConfigWatcher {
    cancel: CancellationToken,
    attached: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching. The watcher stops when `parent` is cancelled or
    /// [`ConfigWatcher::stop`] is called.
    pub fn start(
        store: Arc<ConfigStore>,
        options: WatchOptions,
        parent: &CancellationToken,
        callback: ReloadCallback,
    ) -> Self {
        let cancel = parent.child_token();
        let attached = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(watch_loop(
            store,
            options,
            cancel.clone(),
            Arc::clone(&attached),
            callback,
        ));

        Self {
            cancel,
            attached,
            task: Some(task),
        }
    }

    /// Whether the file-system watch is currently attached.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Stop watching and wait for the task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("attached", &self.is_attached())
            .finish()
    }
}

async fn watch_loop(
    store: Arc<ConfigStore>,
    options: WatchOptions,
    cancel: CancellationToken,
    attached: Arc<AtomicBool>,
    callback: ReloadCallback,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    // Kept alive for the rest of the loop; dropping it ends the watch.
    let _watcher = loop {
        match attach(store.path(), tx.clone()) {
            Ok(watcher) => break watcher,
            Err(e) => {
                warn!(error = %e, retry_in = ?options.retry_delay, "config watcher setup failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(options.retry_delay) => {}
                }
            }
        }
    };
    drop(tx);
    attached.store(true, Ordering::SeqCst);
    info!(path = %store.path().display(), "watching policy document");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            trigger = rx.recv() => {
                if trigger.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(options.settle) => {}
        }

        let mut coalesced = 0usize;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }

        let reload_store = Arc::clone(&store);
        match run_bounded(options.io_timeout, move || reload_store.reload()).await {
            Ok(Ok(snapshot)) => {
                if cancel.is_cancelled() {
                    break;
                }
                debug!(coalesced, default_mode = %snapshot.default_mode(), "policy document reloaded");
                callback(snapshot);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "policy reload failed, keeping current policy");
            }
            Err(BoundedError::TimedOut(limit)) => {
                warn!(timeout = ?limit, "policy reload timed out, keeping current policy");
            }
            Err(BoundedError::Join(message)) => {
                warn!(error = %message, "policy reload task failed, keeping current policy");
            }
        }
    }

    attached.store(false, Ordering::SeqCst);
    debug!("config watcher stopped");
}

fn attach(
    config_path: &Path,
    tx: mpsc::UnboundedSender<()>,
) -> Result<RecommendedWatcher, WatchSetupError> {
    let file_name: OsString = config_path
        .file_name()
        .ok_or_else(|| WatchSetupError::InvalidPath(config_path.to_path_buf()))?
        .to_os_string();
    let directory = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) if is_relevant(&event, &file_name) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "config watcher error"),
        },
        Config::default(),
    )
    .map_err(|e| WatchSetupError::Create(e.to_string()))?;

    watcher
        .watch(directory, RecursiveMode::NonRecursive)
        .map_err(|e| WatchSetupError::Watch {
            path: directory.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(watcher)
}

/// Create, modify (including renames) or remove touching the watched file.
fn is_relevant(event: &Event, file_name: &OsStr) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RenameMode};
    use perfmode_policy::StdFileAccess;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn options() -> WatchOptions {
        WatchOptions {
            retry_delay: Duration::from_millis(50),
            io_timeout: Duration::from_secs(2),
            settle: Duration::from_millis(20),
        }
    }

    fn channel_callback() -> (ReloadCallback, UnboundedReceiver<PolicySnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ReloadCallback = Arc::new(move |snapshot: PolicySnapshot| {
            let _ = tx.send(snapshot);
        });
        (callback, rx)
    }

    async fn wait_attached(watcher: &ConfigWatcher) {
        for _ in 0..200 {
            if watcher.is_attached() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("watcher never attached");
    }

    async fn wait_for_default(rx: &mut UnboundedReceiver<PolicySnapshot>, mode: &str) -> PolicySnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("no reload before deadline")
                .expect("callback channel closed");
            if snapshot.default_mode() == mode {
                return snapshot;
            }
        }
    }

    #[test]
    fn test_is_relevant() {
        let name = OsStr::new("app_config.json");
        let target = PathBuf::from("/data/perfmode/app_config.json");

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(target.clone());
        assert!(is_relevant(&create, name));

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/data/perfmode/.app_config.json.tmp"))
            .add_path(target.clone());
        assert!(is_relevant(&rename, name));

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(target);
        assert!(!is_relevant(&access, name));

        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/data/perfmode/mode.txt"));
        assert!(!is_relevant(&other, name));
    }

    #[tokio::test]
    async fn test_reload_on_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        std::fs::write(&path, r#"{"default": "balance"}"#).unwrap();

        let store = Arc::new(ConfigStore::new(&path, Arc::new(StdFileAccess)));
        let (callback, mut rx) = channel_callback();
        let root = CancellationToken::new();
        let watcher = ConfigWatcher::start(store, options(), &root, callback);
        wait_attached(&watcher).await;

        std::fs::write(&path, r#"{"default": "fast", "performance": ["com.a"]}"#).unwrap();

        let snapshot = wait_for_default(&mut rx, "fast").await;
        assert!(snapshot.members("performance").unwrap().contains("com.a"));

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_half_written_document_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        std::fs::write(&path, r#"{"default": "balance"}"#).unwrap();

        let store = Arc::new(ConfigStore::new(&path, Arc::new(StdFileAccess)));
        let (callback, mut rx) = channel_callback();
        let root = CancellationToken::new();
        let watcher = ConfigWatcher::start(store, options(), &root, callback);
        wait_attached(&watcher).await;

        let partial = r#"{"default": "fast", "performance": ["com"#;
        std::fs::write(&path, partial).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), partial);

        std::fs::write(&path, r#"{"default": "fast", "performance": ["com.a"]}"#).unwrap();
        let snapshot = wait_for_default(&mut rx, "fast").await;
        assert!(snapshot.members("performance").unwrap().contains("com.a"));

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_attaches_once_directory_exists() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("perfmode");
        let path = config_dir.join("app_config.json");

        let store = Arc::new(ConfigStore::new(&path, Arc::new(StdFileAccess)));
        let (callback, mut rx) = channel_callback();
        let root = CancellationToken::new();
        let watcher = ConfigWatcher::start(store, options(), &root, callback);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!watcher.is_attached());

        std::fs::create_dir_all(&config_dir).unwrap();
        wait_attached(&watcher).await;

        std::fs::write(&path, r#"{"default": "performance"}"#).unwrap();
        wait_for_default(&mut rx, "performance").await;

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("app_config.json");

        let store = Arc::new(ConfigStore::new(&path, Arc::new(StdFileAccess)));
        let (callback, _rx) = channel_callback();
        let root = CancellationToken::new();
        let watcher = ConfigWatcher::start(
            store,
            WatchOptions {
                retry_delay: Duration::from_secs(60),
                ..options()
            },
            &root,
            callback,
        );

        root.cancel();
        tokio::time::timeout(Duration::from_secs(2), watcher.stop())
            .await
            .expect("watcher should stop promptly");
    }
}

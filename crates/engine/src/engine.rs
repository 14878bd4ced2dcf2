//! Policy engine - lifecycle state machine and event processing.
//!
//! A single supervisor task per activation drives the engine through
//! `Initializing → Running → Degraded → ... → Stopped`. Transitions from the
//! event source are queued on an unbounded channel and handled one at a time
//! by that task, so the filter and applier state need no locking. The active
//! policy snapshot is the only state shared with the config watcher; it is
//! swapped as a whole.

use crate::applier::{ApplyOutcome, ApplyPolicy, ModeApplier, UNKNOWN_MODE};
use crate::bounded::{run_bounded, BoundedError};
use crate::error::InitError;
use crate::filter::{FilterDecision, FilterRules, ForegroundFilter, UNKNOWN_PACKAGE};
use crate::home::HomeAppCheckRef;
use crate::overlay::status_event;
use crate::settings::EngineSettings;
use crate::source::{EventSourceRef, ForegroundTransition, TransitionCallback};
use crate::watcher::{ConfigWatcher, WatchOptions};
use futures::FutureExt;
use perfmode_events::{
    emit_event, event_names, now_ms, ConfigReloadedEvent, EngineState, EngineStateEvent,
    EventBusRef, ModeAppliedEvent, OverlayVisibilityEvent,
};
use perfmode_policy::{resolve_mode, ConfigError, ConfigStore, FileAccessRef, PolicySnapshot};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineDeps {
    pub files: FileAccessRef,
    pub source: EventSourceRef,
    pub bus: EventBusRef,
    pub home: HomeAppCheckRef,
}

/// Observable engine status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub current_package: String,
    pub previous_package: String,
    pub last_written_mode: String,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Uninitialized,
            current_package: UNKNOWN_PACKAGE.to_string(),
            previous_package: UNKNOWN_PACKAGE.to_string(),
            last_written_mode: UNKNOWN_MODE.to_string(),
        }
    }
}

/// Atomically replaceable snapshot reference.
struct SnapshotCell(RwLock<Arc<PolicySnapshot>>);

impl SnapshotCell {
    fn new(snapshot: PolicySnapshot) -> Self {
        Self(RwLock::new(Arc::new(snapshot)))
    }

    fn load(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, next: Arc<PolicySnapshot>) -> Arc<PolicySnapshot> {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }
}

struct Shared {
    settings: EngineSettings,
    store: Arc<ConfigStore>,
    deps: EngineDeps,
    snapshot: SnapshotCell,
    status: watch::Sender<EngineStatus>,
}

impl Shared {
    fn set_state(&self, state: EngineState, reason: Option<String>) {
        self.status.send_modify(|status| status.state = state);
        match &reason {
            Some(reason) => info!(state = %state, reason = %reason, "engine state changed"),
            None => info!(state = %state, "engine state changed"),
        }
        emit_event(
            &*self.deps.bus,
            event_names::ENGINE_STATE,
            &EngineStateEvent {
                state,
                reason,
                timestamp_ms: now_ms(),
            },
        );
    }

    /// Swap in a new snapshot and announce it.
    fn install_snapshot(&self, snapshot: PolicySnapshot) {
        let next = Arc::new(snapshot);
        let previous = self.snapshot.replace(Arc::clone(&next));

        debug!(
            default_mode = %next.default_mode(),
            assignments = next.assignment_count(),
            floating_window = next.floating_window(),
            "policy snapshot installed"
        );
        emit_event(
            &*self.deps.bus,
            event_names::CONFIG_RELOADED,
            &ConfigReloadedEvent {
                default_mode: next.default_mode().to_string(),
                modes: next.mode_members().keys().cloned().collect(),
                assignments: next.assignment_count(),
                floating_window: next.floating_window(),
                timestamp_ms: now_ms(),
            },
        );

        if previous.floating_window() != next.floating_window() {
            self.set_overlay_visible(next.floating_window());
        }
    }

    fn set_overlay_visible(&self, visible: bool) {
        emit_event(
            &*self.deps.bus,
            event_names::OVERLAY_VISIBILITY,
            &OverlayVisibilityEvent { visible },
        );
    }
}

/// Filter and applier state. Survives re-initialization and reactivation.
struct Processor {
    filter: ForegroundFilter,
    applier: ModeApplier,
}

impl Processor {
    fn new(settings: &EngineSettings, files: FileAccessRef) -> Self {
        Self {
            filter: ForegroundFilter::new(FilterRules::from_settings(settings)),
            applier: ModeApplier::new(
                settings.control_path.clone(),
                files,
                ApplyPolicy::from_settings(settings),
            ),
        }
    }

    async fn handle(
        &mut self,
        shared: &Shared,
        transition: ForegroundTransition,
        cancel: &CancellationToken,
    ) {
        let decision = self.filter.observe(&transition);
        let snapshot = shared.snapshot.load();

        match decision {
            FilterDecision::Committed(change) => {
                let mode = resolve_mode(&change.current, &snapshot);
                debug!(
                    previous = %change.previous,
                    current = %change.current,
                    mode,
                    "foreground changed"
                );

                match self.applier.apply(mode, cancel).await {
                    ApplyOutcome::Applied => emit_event(
                        &*shared.deps.bus,
                        event_names::MODE_APPLIED,
                        &ModeAppliedEvent {
                            package: change.current.clone(),
                            mode: mode.to_string(),
                            timestamp_ms: now_ms(),
                        },
                    ),
                    ApplyOutcome::Skipped => {}
                    ApplyOutcome::Failed(e) => {
                        debug!(package = %change.current, error = %e, "mode left stale until next change");
                    }
                }

                shared.status.send_modify(|status| {
                    status.current_package = change.current.clone();
                    status.previous_package = change.previous.clone();
                    status.last_written_mode = self.applier.last_written_mode().to_string();
                });
                self.report_overlay(shared, &snapshot, &transition.package_id, mode);
            }
            FilterDecision::Noise(reason) => {
                trace!(package = %transition.package_id, class = %transition.source_class, ?reason, "noise transition");
                let mode = resolve_mode(self.filter.current(), &snapshot);
                self.report_overlay(shared, &snapshot, &transition.package_id, mode);
            }
            other => {
                trace!(package = %transition.package_id, decision = ?other, "transition dropped");
            }
        }
    }

    fn report_overlay(&self, shared: &Shared, snapshot: &PolicySnapshot, reported: &str, mode: &str) {
        if !snapshot.floating_window() {
            return;
        }
        let effective = self.filter.current();
        let home_app = shared.deps.home.is_home_app(effective);
        emit_event(
            &*shared.deps.bus,
            event_names::OVERLAY_STATUS,
            &status_event(self.filter.previous(), reported, effective, mode, home_app),
        );
    }
}

/// Resources held while Running.
struct Session {
    events: mpsc::UnboundedReceiver<ForegroundTransition>,
    watcher: ConfigWatcher,
}

impl Session {
    async fn close(self, shared: &Shared) {
        shared.deps.source.unsubscribe();
        self.watcher.stop().await;
    }
}

enum SessionEnd {
    Cancelled,
    SourceClosed,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<Processor>,
}

/// Foreground-tracking performance-mode engine.
///
/// ```ignore
/// let engine = PolicyEngine::new(EngineSettings::default(), deps);
/// engine.activate();
/// // ...
/// engine.deactivate().await;
/// ```
pub struct PolicyEngine {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
    idle: Mutex<Option<Processor>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PolicyEngine {
    pub fn new(settings: EngineSettings, deps: EngineDeps) -> Self {
        let store = Arc::new(ConfigStore::new(
            settings.config_path.clone(),
            Arc::clone(&deps.files),
        ));
        let processor = Processor::new(&settings, Arc::clone(&deps.files));
        let (status, _) = watch::channel(EngineStatus::default());

        Self {
            shared: Arc::new(Shared {
                settings,
                store,
                deps,
                snapshot: SnapshotCell::new(PolicySnapshot::default()),
                status,
            }),
            run: Mutex::new(None),
            idle: Mutex::new(Some(processor)),
        }
    }

    /// Start the engine. Must be called from within a Tokio runtime.
    ///
    /// Allowed from `Uninitialized` and `Stopped`; ignored while active.
    pub fn activate(&self) {
        let mut run = lock(&self.run);
        if run.is_some() {
            warn!("engine already active");
            return;
        }

        let processor = lock(&self.idle).take().unwrap_or_else(|| {
            Processor::new(&self.shared.settings, Arc::clone(&self.shared.deps.files))
        });
        let cancel = CancellationToken::new();

        self.shared.set_state(EngineState::Initializing, None);
        let task = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            processor,
            cancel.clone(),
        ));
        *run = Some(RunHandle { cancel, task });
    }

    /// Stop the engine and wait until it reaches `Stopped`.
    pub async fn deactivate(&self) {
        let handle = lock(&self.run).take();
        let Some(handle) = handle else {
            debug!("engine not active");
            return;
        };

        handle.cancel.cancel();
        match handle.task.await {
            Ok(processor) => {
                *lock(&self.idle) = Some(processor);
            }
            Err(e) => {
                error!(error = %e, "engine task failed");
                self.shared.set_state(EngineState::Stopped, Some(e.to_string()));
            }
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.run).is_some()
    }

    pub fn state(&self) -> EngineState {
        self.shared.status.borrow().state
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.shared.status.subscribe()
    }

    /// The active policy snapshot.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.shared.snapshot.load()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Persist a per-app mode assignment and make it active immediately.
    ///
    /// The watcher reloads the same document shortly after; that reload
    /// yields an equal snapshot.
    pub async fn assign_app_mode(&self, package: &str, mode: &str) -> Result<(), ConfigError> {
        let store = Arc::clone(&self.shared.store);
        let (package, mode) = (package.to_string(), mode.to_string());
        let snapshot = match run_bounded(self.shared.settings.io_timeout(), move || {
            store.update_app_mode(&package, &mode)
        })
        .await
        {
            Ok(result) => result?,
            Err(BoundedError::TimedOut(limit)) => return Err(ConfigError::Timeout(limit)),
            Err(BoundedError::Join(message)) => {
                return Err(ConfigError::Write {
                    path: self.shared.store.path().to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, message),
                })
            }
        };
        self.shared.install_snapshot(snapshot);
        Ok(())
    }
}

impl Drop for PolicyEngine {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.run).take() {
            handle.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("status", &self.status())
            .field("config_path", &self.shared.settings.config_path)
            .finish()
    }
}

async fn supervise(shared: Arc<Shared>, mut processor: Processor, cancel: CancellationToken) -> Processor {
    loop {
        let init = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = initialize(&shared, &cancel) => result,
        };

        let reason = match init {
            Ok(mut session) => {
                shared.set_state(EngineState::Running, None);
                let end = run_session(&shared, &mut processor, &mut session.events, &cancel).await;
                session.close(&shared).await;
                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::SourceClosed => {
                        warn!("foreground event source closed");
                        "event source closed".to_string()
                    }
                }
            }
            Err(e) => {
                warn!(stage = e.stage(), error = %e, "engine initialization failed");
                e.to_string()
            }
        };

        shared.set_state(EngineState::Degraded, Some(reason));
        let retry = shared.settings.init_retry();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry) => {}
        }
        shared.set_state(EngineState::Initializing, None);
    }

    shared.set_overlay_visible(false);
    shared.set_state(EngineState::Stopped, None);
    processor
}

/// Directories, policy, event subscription, watcher. Nothing after the
/// subscription awaits, so dropping this future never leaks a subscription.
async fn initialize(shared: &Arc<Shared>, cancel: &CancellationToken) -> Result<Session, InitError> {
    let timeout = shared.settings.io_timeout();

    for dir in shared.settings.required_directories() {
        let files = Arc::clone(&shared.deps.files);
        let target = dir.clone();
        let created = run_bounded(timeout, move || files.create_dir_all(&target))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string()));
        if let Err(message) = created {
            return Err(InitError::Directories { path: dir, message });
        }
    }

    let store = Arc::clone(&shared.store);
    let snapshot = match run_bounded(timeout, move || store.load()).await {
        Ok(result) => result?,
        Err(BoundedError::TimedOut(limit)) => return Err(ConfigError::Timeout(limit).into()),
        Err(BoundedError::Join(message)) => return Err(InitError::Task(message)),
    };
    shared.install_snapshot(snapshot);

    let (tx, events) = mpsc::unbounded_channel::<ForegroundTransition>();
    let callback: TransitionCallback = Arc::new(move |transition: ForegroundTransition| {
        let _ = tx.send(transition);
    });
    shared.deps.source.subscribe(callback)?;

    let reload_shared = Arc::clone(shared);
    let watcher = ConfigWatcher::start(
        Arc::clone(&shared.store),
        WatchOptions::from_settings(&shared.settings),
        cancel,
        Arc::new(move |snapshot: PolicySnapshot| reload_shared.install_snapshot(snapshot)),
    );

    Ok(Session { events, watcher })
}

async fn run_session(
    shared: &Shared,
    processor: &mut Processor,
    events: &mut mpsc::UnboundedReceiver<ForegroundTransition>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let transition = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = events.recv() => match next {
                Some(transition) => transition,
                None => return SessionEnd::SourceClosed,
            },
        };

        let handled = AssertUnwindSafe(processor.handle(shared, transition, cancel))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            error!(panic = %panic_message(panic.as_ref()), "transition handling panicked");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

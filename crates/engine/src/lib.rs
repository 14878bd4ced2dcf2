//! Foreground-tracking policy engine for perfmode.
//!
//! Observes foreground-window transitions, filters noise, resolves the
//! winning package to a performance mode and writes that mode to the control
//! surface when it changes. The policy document is hot-reloaded while
//! events are processed.
//!
//! # Architecture
//!
//! ```text
//!  ForegroundEventSource ──callback──► mpsc (FIFO)
//!                                          │
//!                                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PolicyEngine supervisor task                 │
//! │  filter.rs  - ForegroundFilter (noise, duplicates)          │
//! │      │                                                      │
//! │      ▼                                                      │
//! │  resolve_mode(package, snapshot) ◄── SnapshotCell (Arc)     │
//! │      │                                   ▲                  │
//! │      ▼                                   │                  │
//! │  applier.rs - ModeApplier ──► control    │                  │
//! │                               surface    │                  │
//! └──────────────────────────────────────────┼──────────────────┘
//!                                            │ swap
//!                         watcher.rs - ConfigWatcher (notify)
//! ```
//!
//! Lifecycle: `Uninitialized → Initializing → Running`, `Degraded` with a
//! timed retry on any initialization failure, `Stopped` on deactivation.

mod applier;
mod bounded;
mod engine;
mod error;
mod filter;
mod home;
mod overlay;
mod settings;
mod source;
mod watcher;

pub use applier::{ApplyError, ApplyOutcome, ApplyPolicy, ModeApplier, UNKNOWN_MODE};
pub use bounded::{run_bounded, BoundedError};
pub use engine::{EngineDeps, EngineStatus, PolicyEngine};
pub use error::InitError;
pub use filter::{
    CommittedChange, FilterDecision, FilterRules, ForegroundFilter, NoiseReason, UNKNOWN_PACKAGE,
};
pub use home::{HomeAppCheck, HomeAppCheckRef, MemoizedHomeApps, NoHomeApps, StaticHomeApps};
pub use overlay::{format_status, status_event};
pub use settings::{default_data_dir, EngineSettings, SettingsError};
pub use source::{
    monotonic_ms, ChannelEventSource, EventSourceRef, ForegroundEventSource, ForegroundTransition,
    SourceError, TransitionCallback,
};
pub use watcher::{ConfigWatcher, ReloadCallback, WatchOptions, WatchSetupError, DEFAULT_SETTLE};

// Re-export so hosts depend on one crate.
pub use perfmode_events as events;
pub use perfmode_policy as policy;

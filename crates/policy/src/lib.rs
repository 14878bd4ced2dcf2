//! Performance-mode policy for perfmode.
//!
//! This crate owns the policy data that decides which performance mode an
//! application runs in:
//! - Policy snapshot (default mode, mode → package sets, overlay flag)
//! - JSON policy document parsing and rendering
//! - Mode resolution for a foreground package
//! - Config store that loads, defaults and saves the document
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Domain Layer                             │
//! │  snapshot.rs - PolicySnapshot (immutable)                   │
//! │  resolver.rs - Package → mode resolution (pure)             │
//! │  document.rs - JSON document <-> snapshot                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Infrastructure Layer                        │
//! │  files.rs - FileAccess capability (std, in-memory)          │
//! │  store.rs - ConfigStore load/save/update                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use perfmode_policy::{resolve_mode, ConfigStore, StdFileAccess};
//! use std::sync::Arc;
//!
//! let store = ConfigStore::new("/sdcard/Android/perfmode/app_config.json", Arc::new(StdFileAccess));
//! let snapshot = store.load()?;
//! println!("mode: {}", resolve_mode("com.example.game", &snapshot));
//! ```

mod document;
mod error;
mod files;
mod resolver;
mod snapshot;
mod store;

pub use document::{parse_document, render_document, DEFAULT_KEY, FLOATING_WINDOW_KEY};
pub use error::{ConfigError, Result};
pub use files::{FileAccess, FileAccessRef, MemoryFiles, StdFileAccess};
pub use resolver::resolve_mode;
pub use snapshot::{PolicySnapshot, FALLBACK_MODE};
pub use store::ConfigStore;

//! # Pimsync Engine
//!
//! Cursor-based device synchronization engine for groupware collections
//! (contacts, calendar, tasks, mail).
//!
//! This crate provides:
//! - Cursor store (per-collection sync counters with monotonic advance)
//! - Content-state tracker (per-device ledger of delivered items)
//! - Folder registry (collection metadata and staleness detection)
//! - Continuation store (windowed-delta remainders with expiry)
//! - Change applier (client-ward mutations with per-item outcomes)
//! - Delta computer (ledger-diffed server-ward add/change/delete sets)
//! - Window controller (bounded responses with continuation)
//! - The orchestrator driving one stateless sync dialogue end to end
//!
//! ## Architecture
//!
//! The engine holds no live connection and no transaction across
//! requests; all cross-request state lives in the stores. One dialogue
//! for one (device, collection) runs synchronously under a per-key lock,
//! while different collections proceed independently; a failure in one
//! never blocks the others.
//!
//! Per-data-type storage is an external capability: implement
//! [`DataController`] per data class and register the implementations in
//! a [`ControllerRegistry`]. The engine reaches all external state
//! through that registry; there is no global singleton anywhere.
//!
//! ## Key Invariants
//!
//! - Cursor counters are strictly increasing and never reused
//! - Cursor 0 always means "initial sync, no prior state"
//! - A dialogue that fails leaves cursor and ledger untouched, so an
//!   identical retry is safe
//! - Windowing throttles only the server-ward delta, never the
//!   acknowledgment of client mutations

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect() outside tests.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod applier;
mod config;
mod content_state;
mod continuation;
mod cursor;
mod data;
mod delta;
mod device;
mod error;
mod folder;
mod orchestrator;
mod window;

pub use applier::{AppliedBatch, ChangeApplier, ClientEcho, ForcedSet};
pub use config::SyncConfig;
pub use content_state::ContentStateTracker;
pub use continuation::{Continuation, ContinuationStore};
pub use cursor::{CursorStore, SyncCursor};
pub use data::{
    ControllerError, ControllerRegistry, ControllerResult, DataController, MemoryController,
};
pub use delta::{compute_deltas, DeltaSet};
pub use device::{Device, DeviceRegistry};
pub use error::{EngineError, EngineResult};
pub use folder::{FolderRegistry, FolderState};
pub use orchestrator::SyncEngine;
pub use window::split_window;

//! # mirrorlite engine
//!
//! Keeps a single embedded SQLite database file, living on ephemeral local
//! disk, durably mirrored as a blob in an object-storage bucket across
//! process restarts.
//!
//! This crate provides:
//! - Cold-start recovery (download, keep local, or start fresh)
//! - Guarded uploads with data-loss-avoidance heuristics
//! - Batched and time-based flushing with inline backpressure
//! - Signal-driven final flush and a periodic sync timer
//!
//! ## Architecture
//!
//! The engine is a single [`SyncCoordinator`] constructed once per process,
//! wired to the process lifecycle by a [`LifecycleManager`] (or the
//! [`SyncService`] facade that assembles both). The data layer interacts
//! with it through exactly two calls: [`SyncCoordinator::mark_changed`]
//! after every mutation and [`SyncCoordinator::get_store`] for the ready
//! database handle.
//!
//! ## Key Invariants
//!
//! - Uploads never proceed for placeholder-sized, structurally empty, or
//!   remotely-shadowed (smaller-than-remote) local files
//! - The WAL is checkpointed before every upload so the blob is
//!   self-consistent
//! - Initialization is single-flight: concurrent callers share one recovery
//! - Sync cycles are mutually exclusive
//! - Guard skips are outcomes, never errors; only upload failures propagate
//!
//! A process killed without a termination signal can still lose unflushed
//! changes; the engine narrows that window, it does not eliminate it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod lifecycle;
mod local;
mod remote;
mod tracker;

pub use config::{
    EngineConfig, RetryConfig, ENV_BATCH_SIZE, ENV_BUCKET_NAME, ENV_SYNC_INTERVAL_MS,
};
pub use coordinator::{EngineState, SkipReason, SyncCoordinator, SyncOutcome, SyncStats};
pub use error::{EngineError, EngineResult};
pub use lifecycle::{LifecycleManager, SyncService};
pub use local::{Checkpoint, LocalDatabase};
pub use remote::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use tracker::ChangeTracker;

//! Sync orchestration: cold-start recovery, guarded upload, and the
//! batch/time-triggered flush paths.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::local::{Checkpoint, LocalDatabase};
use crate::remote::{with_retry, BlobStore};
use crate::tracker::ChangeTracker;
use parking_lot::RwLock;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Content type attached to every uploaded database blob.
const BLOB_CONTENT_TYPE: &str = "application/x-sqlite3";
/// Cache policy attached to every uploaded database blob.
const BLOB_CACHE_CONTROL: &str = "no-cache";
/// Sidecar suffixes cleaned up remotely after an upload, and locally after
/// a download overwrites the main file.
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// The current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No initialization attempted yet.
    Uninitialized,
    /// Cold-start recovery is in flight.
    Initializing,
    /// The database handle is ready; no sync in progress.
    Ready,
    /// A sync cycle is running.
    Syncing,
    /// A termination signal arrived; the final flush is in progress.
    ShuttingDown,
    /// The final flush finished; no further syncs will run.
    Stopped,
    /// Cold-start recovery failed; the process should exit.
    Failed,
}

impl EngineState {
    /// Returns true if the database handle is usable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Syncing)
    }

    /// Returns true if the engine will never become ready again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Failed)
    }
}

/// Why a sync cycle skipped its upload.
///
/// A skip is a deliberate no-op from a safety heuristic, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The local database file does not exist yet.
    LocalMissing,
    /// The local file is no bigger than an empty placeholder.
    BelowMinViableSize,
    /// The canary table has no rows (or could not be probed).
    EmptyDatabase,
    /// The remote blob is larger than the local file (shrink protection).
    RemoteLarger,
    /// The remote size probe failed, so shrink protection could not be
    /// evaluated; uploading blind would risk clobbering newer data.
    RemoteProbeFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::LocalMissing => "local database file missing",
            SkipReason::BelowMinViableSize => "local file not above minimum viable size",
            SkipReason::EmptyDatabase => "local database is structurally empty",
            SkipReason::RemoteLarger => "remote blob is larger than the local file",
            SkipReason::RemoteProbeFailed => "remote size could not be determined",
        };
        f.write_str(reason)
    }
}

/// Result of a sync cycle that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The local file was uploaded.
    Uploaded {
        /// Size of the uploaded blob in bytes.
        bytes: u64,
    },
    /// A guard short-circuited the cycle before the upload.
    Skipped(SkipReason),
}

impl SyncOutcome {
    /// Returns true if the cycle uploaded a blob.
    #[must_use]
    pub fn uploaded(&self) -> bool {
        matches!(self, SyncOutcome::Uploaded { .. })
    }
}

/// Statistics about sync activity since process start.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Number of completed uploads.
    pub uploads_completed: u64,
    /// Total bytes uploaded.
    pub bytes_uploaded: u64,
    /// Number of cycles short-circuited by a guard.
    pub guard_skips: u64,
    /// Last error message, cleared by the next successful upload.
    pub last_error: Option<String>,
    /// Time of the last successful upload.
    pub last_sync_time: Option<Instant>,
}

/// Orchestrates recovery and mirroring of the local database.
///
/// Constructed once per process and shared via `Arc`; collaborators reach
/// it by reference instead of through module-level globals. Only the
/// coordinator mutates sync state — everything else calls
/// [`SyncCoordinator::mark_changed`] and nothing more.
pub struct SyncCoordinator<S: BlobStore> {
    config: EngineConfig,
    remote: Arc<S>,
    db: OnceCell<Arc<LocalDatabase>>,
    tracker: ChangeTracker,
    state: RwLock<EngineState>,
    stats: RwLock<SyncStats>,
    // Serializes sync cycles so a timer-triggered and a mutation-triggered
    // sync can never interleave their guard checks and uploads.
    sync_lock: Mutex<()>,
}

impl<S: BlobStore> SyncCoordinator<S> {
    /// Creates a coordinator. Recovery does not start until the first
    /// [`SyncCoordinator::get_store`] call.
    pub fn new(config: EngineConfig, remote: S) -> Self {
        Self {
            config,
            remote: Arc::new(remote),
            db: OnceCell::new(),
            tracker: ChangeTracker::new(),
            state: RwLock::new(EngineState::Uninitialized),
            stats: RwLock::new(SyncStats::default()),
            sync_lock: Mutex::new(()),
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<S> {
        &self.remote
    }

    /// Returns the change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Returns the current engine state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Returns a snapshot of the sync statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Records that a mutation occurred since the last sync.
    pub fn mark_changed(&self) {
        self.tracker.mark_changed();
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    /// Returns the ready database handle, running cold-start recovery on
    /// the first call.
    ///
    /// Concurrent callers all await the same in-flight initialization; the
    /// download happens at most once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Initialization`] if recovery fails (for
    /// example, download retries exhausted). Startup should treat this as
    /// fatal.
    pub async fn get_store(&self) -> EngineResult<Arc<LocalDatabase>> {
        let db = self.db.get_or_try_init(|| self.initialize()).await?;
        Ok(Arc::clone(db))
    }

    async fn initialize(&self) -> EngineResult<Arc<LocalDatabase>> {
        self.set_state(EngineState::Initializing);
        info!(path = %self.config.local_path.display(), "initializing database");

        match self.recover().await {
            Ok(db) => {
                if db.is_empty(&self.config.canary_table) {
                    warn!("database is empty after recovery");
                }
                self.set_state(EngineState::Ready);
                info!(bytes = db.size_on_disk(), "database ready");
                Ok(db)
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                self.stats.write().last_error = Some(e.to_string());
                Err(EngineError::Initialization(e.to_string()))
            }
        }
    }

    /// Decides, in order, whether to keep the local file, download the
    /// remote blob, or start fresh.
    async fn recover(&self) -> EngineResult<Arc<LocalDatabase>> {
        let cfg = &self.config;
        let key = &cfg.remote_key;
        let path = &cfg.local_path;
        let local_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let local_exists = path.exists();

        let exists = with_retry(&cfg.retry, cfg.request_timeout, "exists", || {
            self.remote.exists(key)
        })
        .await?;

        if !exists {
            info!("remote blob absent; starting with a fresh local database");
        } else {
            let remote_size = with_retry(&cfg.retry, cfg.request_timeout, "size", || {
                self.remote.size(key)
            })
            .await?;

            if remote_size <= cfg.min_viable_size {
                info!(
                    remote_size,
                    "remote blob is an empty placeholder; keeping local state"
                );
            } else if local_exists && remote_size < local_size {
                warn!(
                    remote_size,
                    local_size, "remote blob is smaller than the local database; keeping local file"
                );
            } else {
                info!(remote_size, "downloading database blob");
                let bytes = with_retry(&cfg.retry, cfg.request_timeout, "download", || {
                    self.remote.download(key)
                })
                .await?;

                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, &bytes).await?;

                // Stale sidecars from a previous process would shadow the
                // freshly downloaded main file.
                for suffix in SIDECAR_SUFFIXES {
                    let _ = tokio::fs::remove_file(sidecar_path(path, suffix)).await;
                }
            }
        }

        Ok(Arc::new(LocalDatabase::open(path)?))
    }

    /// Called by the mutation path after [`SyncCoordinator::mark_changed`].
    ///
    /// If the batch or time threshold is crossed, runs a full sync cycle
    /// synchronously relative to the caller — the mutation that crosses the
    /// threshold pays the sync latency, and an upload failure surfaces to
    /// that caller.
    pub async fn request_sync_if_needed(&self) -> EngineResult<Option<SyncOutcome>> {
        if !self
            .tracker
            .should_sync_now(self.config.batch_size, self.config.sync_interval)
        {
            return Ok(None);
        }

        debug!("sync threshold crossed; syncing inline");
        let outcome = self.sync().await?;
        if outcome.uploaded() {
            self.tracker.reset();
        }
        Ok(Some(outcome))
    }

    /// Runs one guarded sync cycle.
    ///
    /// Cycles are mutually exclusive; a concurrent caller waits for the
    /// in-flight cycle to finish. Guard skips are returned as
    /// [`SyncOutcome::Skipped`] and never raise; only the upload step (or
    /// reading the file for it) produces an error.
    pub async fn sync(&self) -> EngineResult<SyncOutcome> {
        let _guard = self.sync_lock.lock().await;

        let was_ready = {
            let mut state = self.state.write();
            if *state == EngineState::Ready {
                *state = EngineState::Syncing;
                true
            } else {
                false
            }
        };

        let result = self.sync_locked().await;

        if was_ready {
            let mut state = self.state.write();
            if *state == EngineState::Syncing {
                *state = EngineState::Ready;
            }
        }

        match &result {
            Ok(SyncOutcome::Uploaded { bytes }) => {
                let mut stats = self.stats.write();
                stats.uploads_completed += 1;
                stats.bytes_uploaded += *bytes;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Ok(SyncOutcome::Skipped(_)) => {
                self.stats.write().guard_skips += 1;
            }
            Err(e) => {
                self.stats.write().last_error = Some(e.to_string());
            }
        }

        result
    }

    async fn sync_locked(&self) -> EngineResult<SyncOutcome> {
        let cfg = &self.config;
        let key = &cfg.remote_key;

        let Some(db) = self.db.get() else {
            debug!("sync requested before initialization; skipping");
            return Ok(SyncOutcome::Skipped(SkipReason::LocalMissing));
        };

        if !db.exists() {
            info!("sync skipped: local database file missing");
            return Ok(SyncOutcome::Skipped(SkipReason::LocalMissing));
        }

        let local_size = db.size_on_disk();
        if local_size <= cfg.min_viable_size {
            info!(
                local_size,
                min_viable_size = cfg.min_viable_size,
                "sync skipped: local file not above minimum viable size"
            );
            return Ok(SyncOutcome::Skipped(SkipReason::BelowMinViableSize));
        }

        if db.is_empty(&cfg.canary_table) {
            info!("sync skipped: database is structurally empty");
            return Ok(SyncOutcome::Skipped(SkipReason::EmptyDatabase));
        }

        let remote_size = match with_retry(&cfg.retry, cfg.request_timeout, "size", || {
            self.remote.size(key)
        })
        .await
        {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "sync skipped: remote size could not be determined");
                return Ok(SyncOutcome::Skipped(SkipReason::RemoteProbeFailed));
            }
        };

        if remote_size > 0 && local_size < remote_size {
            warn!(
                local_size,
                remote_size, "sync skipped: remote blob is larger than the local database"
            );
            return Ok(SyncOutcome::Skipped(SkipReason::RemoteLarger));
        }

        match db.checkpoint() {
            Ok(Checkpoint::Complete) => {}
            Ok(Checkpoint::Partial) => warn!("WAL checkpoint only partially completed"),
            Err(e) => warn!(error = %e, "WAL checkpoint failed; uploading current contents"),
        }

        let bytes = tokio::fs::read(db.path()).await?;
        let len = bytes.len() as u64;

        tokio::time::timeout(
            cfg.request_timeout,
            self.remote
                .upload(key, &bytes, BLOB_CONTENT_TYPE, BLOB_CACHE_CONTROL),
        )
        .await
        .map_err(|_| EngineError::Timeout(cfg.request_timeout))?
        .map_err(|e| EngineError::Upload(e.to_string()))?;

        info!(bytes = len, key = %key, "database blob uploaded");

        // The uploaded blob is checkpointed, so remote sidecars from any
        // earlier scheme are stale. Absence is fine.
        for suffix in SIDECAR_SUFFIXES {
            let sidecar = format!("{key}{suffix}");
            let deleted = tokio::time::timeout(cfg.request_timeout, self.remote.delete(&sidecar))
                .await
                .map_err(|_| EngineError::Timeout(cfg.request_timeout))
                .and_then(|r| r);
            if let Err(e) = deleted {
                debug!(key = %sidecar, error = %e, "sidecar cleanup failed");
            }
        }

        Ok(SyncOutcome::Uploaded { bytes: len })
    }

    /// Timer path: runs a sync only when changes are pending; failures are
    /// logged and never propagated, so a background error cannot crash the
    /// process.
    pub async fn periodic_sync(&self) {
        if !self.tracker.has_changes() {
            return;
        }

        match self.sync().await {
            Ok(outcome) => {
                if outcome.uploaded() {
                    self.tracker.reset();
                }
            }
            Err(e) => warn!(error = %e, "periodic sync failed"),
        }
    }

    /// Signal path: flushes pending changes before the process exits,
    /// bounded by the configured shutdown timeout.
    pub async fn flush_on_shutdown(&self) {
        self.set_state(EngineState::ShuttingDown);

        if self.tracker.has_changes() {
            match tokio::time::timeout(self.config.shutdown_timeout, self.sync()).await {
                Ok(Ok(outcome)) => {
                    if outcome.uploaded() {
                        self.tracker.reset();
                        info!("final flush complete");
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "final flush failed"),
                Err(_) => warn!(
                    timeout = ?self.config.shutdown_timeout,
                    "final flush did not complete in time"
                ),
            }
        }

        self.set_state(EngineState::Stopped);
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

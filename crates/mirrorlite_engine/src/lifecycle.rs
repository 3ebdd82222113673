//! Process lifecycle wiring: termination signals and the periodic timer.

use crate::config::EngineConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::EngineResult;
use crate::local::LocalDatabase;
use crate::remote::BlobStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Drives the coordinator from the process lifecycle.
///
/// Owns the shutdown channel, the idempotent signal registration, and the
/// recurring timer task. Constructed once per process.
#[derive(Debug)]
pub struct LifecycleManager {
    signals_registered: AtomicBool,
    timer_started: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl LifecycleManager {
    /// Creates a manager with nothing registered yet.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            signals_registered: AtomicBool::new(false),
            timer_started: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Spawns a task that waits for a termination signal, flushes pending
    /// changes through the coordinator, and then triggers shutdown.
    ///
    /// Idempotent: repeated calls register nothing further.
    pub fn register_signal_handlers<S: BlobStore + 'static>(
        &self,
        coordinator: Arc<SyncCoordinator<S>>,
    ) {
        if self.signals_registered.swap(true, Ordering::SeqCst) {
            return;
        }

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("termination signal received; flushing before exit");
            coordinator.flush_on_shutdown().await;
            shutdown.send_replace(true);
        });
    }

    /// Spawns the recurring timer task calling
    /// [`SyncCoordinator::periodic_sync`] until shutdown.
    ///
    /// Idempotent: repeated calls start nothing further.
    pub fn start_periodic_timer<S: BlobStore + 'static>(
        &self,
        coordinator: Arc<SyncCoordinator<S>>,
        interval: Duration,
    ) {
        if self.timer_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the timer
            // fires one interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => coordinator.periodic_sync().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("periodic sync timer stopped");
        });
    }

    /// Triggers shutdown without a signal (tests, embedding hosts).
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns true once shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.subscribe().borrow()
    }

    /// Waits until shutdown has been triggered and the final flush is done.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::warn;

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; listening for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// The assembled engine: one coordinator plus its lifecycle wiring.
///
/// [`SyncService::start`] performs fail-fast initialization, registers the
/// signal handlers, and starts the periodic timer — once per process. This
/// is the surface the application embeds; repositories reach the database
/// through [`SyncService::get_store`].
pub struct SyncService<S: BlobStore + 'static> {
    coordinator: Arc<SyncCoordinator<S>>,
    lifecycle: Arc<LifecycleManager>,
}

impl<S: BlobStore + 'static> SyncService<S> {
    /// Initializes the engine and wires it to the process lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Initialization`] if cold-start
    /// recovery fails; the host process should exit.
    pub async fn start(config: EngineConfig, remote: S) -> EngineResult<Self> {
        let interval = config.sync_interval;
        let coordinator = Arc::new(SyncCoordinator::new(config, remote));
        coordinator.get_store().await?;

        let lifecycle = Arc::new(LifecycleManager::new());
        lifecycle.register_signal_handlers(Arc::clone(&coordinator));
        lifecycle.start_periodic_timer(Arc::clone(&coordinator), interval);

        Ok(Self {
            coordinator,
            lifecycle,
        })
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator<S>> {
        &self.coordinator
    }

    /// Returns the lifecycle manager.
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Returns the ready database handle.
    ///
    /// # Errors
    ///
    /// Propagates initialization errors (only possible if the first
    /// initialization failed and is being retried).
    pub async fn get_store(&self) -> EngineResult<Arc<LocalDatabase>> {
        self.coordinator.get_store().await
    }

    /// Records a mutation; call after every insert/update/delete.
    pub fn mark_changed(&self) {
        self.coordinator.mark_changed();
    }

    /// Runs an inline sync if the batch or time threshold is crossed.
    ///
    /// # Errors
    ///
    /// Surfaces an upload failure to the mutation that crossed the
    /// threshold.
    pub async fn request_sync_if_needed(
        &self,
    ) -> EngineResult<Option<crate::coordinator::SyncOutcome>> {
        self.coordinator.request_sync_if_needed().await
    }

    /// Blocks until a termination signal has been handled and the final
    /// flush is complete.
    pub async fn wait_for_shutdown(&self) {
        self.lifecycle.wait_for_shutdown().await;
    }
}

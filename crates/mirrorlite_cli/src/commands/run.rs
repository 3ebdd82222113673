//! Run the engine for the life of the process.

use mirrorlite_engine::{EngineConfig, FsBlobStore, SyncService};
use tracing::info;

/// Initializes the engine, wires it to the process lifecycle, and waits for
/// the signal-triggered final flush.
///
/// Exits with code 0 after a graceful flush; an initialization failure
/// propagates so the host fails fast.
pub async fn run(
    config: EngineConfig,
    store: FsBlobStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = SyncService::start(config, store).await?;

    info!("engine running; send SIGINT or SIGTERM to flush and exit");
    service.wait_for_shutdown().await;
    info!("shutdown complete");

    Ok(())
}

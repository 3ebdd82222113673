//! Force a single sync cycle.

use mirrorlite_engine::{EngineConfig, FsBlobStore, SyncCoordinator, SyncOutcome};

/// Runs one guarded sync cycle and reports the outcome.
pub async fn run(
    config: EngineConfig,
    store: FsBlobStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = SyncCoordinator::new(config, store);
    coordinator.get_store().await?;

    match coordinator.sync().await? {
        SyncOutcome::Uploaded { bytes } => {
            println!("✓ Uploaded {} bytes", bytes);
            println!("  Key: {}", coordinator.config().remote_key);
        }
        SyncOutcome::Skipped(reason) => {
            println!("Skipped: {reason}");
        }
    }

    Ok(())
}

//! Recover the database from the bucket onto local disk.

use mirrorlite_engine::{EngineConfig, FsBlobStore, SyncCoordinator};

/// Runs cold-start recovery and reports the resulting database.
pub async fn run(
    config: EngineConfig,
    store: FsBlobStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let canary = config.canary_table.clone();
    let coordinator = SyncCoordinator::new(config, store);
    let db = coordinator.get_store().await?;

    println!("✓ Database ready");
    println!("  Path: {}", db.path().display());
    println!("  Size: {} bytes", db.size_on_disk());
    println!("  Empty: {}", db.is_empty(&canary));

    Ok(())
}

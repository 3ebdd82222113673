//! Show local and remote state.

use mirrorlite_engine::{BlobStore, EngineConfig, FsBlobStore};

/// Prints the local file and remote blob state side by side.
///
/// Reads only metadata; never opens or creates the local database.
pub async fn run(
    config: EngineConfig,
    store: FsBlobStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let local_size = std::fs::metadata(&config.local_path)
        .map(|m| m.len())
        .unwrap_or(0);
    let local_exists = config.local_path.exists();
    let remote_exists = store.exists(&config.remote_key).await?;
    let remote_size = store.size(&config.remote_key).await?;

    if local_exists {
        println!(
            "Local:  {} ({} bytes)",
            config.local_path.display(),
            local_size
        );
    } else {
        println!("Local:  {} (absent)", config.local_path.display());
    }

    if remote_exists {
        println!("Remote: {} ({} bytes)", config.remote_key, remote_size);
    } else {
        println!("Remote: {} (absent)", config.remote_key);
    }

    let verdict = if !local_exists && !remote_exists {
        "nothing mirrored yet"
    } else if !remote_exists {
        "local only; not yet uploaded"
    } else if !local_exists {
        "remote only; will download on next start"
    } else if local_size == remote_size {
        "in sync (by size)"
    } else if local_size > remote_size {
        "local ahead (by size)"
    } else {
        "remote ahead (by size)"
    };
    println!("State:  {verdict}");

    Ok(())
}

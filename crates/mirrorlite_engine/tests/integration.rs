//! Integration tests for the mirroring engine.

use mirrorlite_engine::{
    EngineConfig, EngineState, FsBlobStore, LifecycleManager, LocalDatabase, MemoryBlobStore,
    RetryConfig, SyncCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

const KEY: &str = "app.sqlite3";

fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig::new()
        .with_local_path(dir.path().join("scratch").join(KEY))
        .with_batch_size(3)
        .with_sync_interval(Duration::from_secs(3600))
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(1)))
}

/// Builds the bytes of a real, checkpointed database with `rows` rows in
/// the canary table.
fn make_database_bytes(rows: usize) -> Vec<u8> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seed.sqlite3");
    let db = LocalDatabase::open(&path).unwrap();
    db.with_conn(|conn| {
        conn.execute_batch("CREATE TABLE entries (id INTEGER PRIMARY KEY, body TEXT)")?;
        for i in 0..rows {
            conn.execute(
                "INSERT INTO entries (body) VALUES (?1)",
                [format!("row-{i}")],
            )?;
        }
        Ok(())
    })
    .unwrap();
    db.checkpoint().unwrap();
    drop(db);
    std::fs::read(&path).unwrap()
}

async fn seed_viable(coordinator: &SyncCoordinator<MemoryBlobStore>, rows: usize) {
    let db = coordinator.get_store().await.unwrap();
    db.with_conn(|conn| {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS entries (id INTEGER PRIMARY KEY, body TEXT)")?;
        for i in 0..rows {
            conn.execute(
                "INSERT INTO entries (body) VALUES (?1)",
                [format!("row-{i}")],
            )?;
        }
        Ok(())
    })
    .unwrap();
    db.checkpoint().unwrap();
}

#[tokio::test]
async fn concurrent_initialization_downloads_once() {
    let dir = tempdir().unwrap();
    let store = MemoryBlobStore::new();
    store.insert(KEY, make_database_bytes(100));

    let coordinator = Arc::new(SyncCoordinator::new(test_config(&dir), store));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            coordinator.get_store().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(coordinator.remote().download_calls(), 1);
    assert_eq!(coordinator.state(), EngineState::Ready);
}

#[tokio::test]
async fn cold_start_with_nothing_creates_fresh_empty_database() {
    let dir = tempdir().unwrap();
    let coordinator = SyncCoordinator::new(test_config(&dir), MemoryBlobStore::new());

    let db = coordinator.get_store().await.unwrap();
    assert!(db.exists());
    assert!(db.is_empty("entries"));
    assert_eq!(coordinator.remote().download_calls(), 0);
}

#[tokio::test]
async fn cold_start_keeps_local_when_remote_is_placeholder() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    // Pre-existing local database with data.
    let local = LocalDatabase::open(&config.local_path).unwrap();
    local
        .with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE entries (id INTEGER PRIMARY KEY, body TEXT);
                 INSERT INTO entries (body) VALUES ('kept');",
            )
        })
        .unwrap();
    local.checkpoint().unwrap();
    drop(local);
    let before = std::fs::read(&config.local_path).unwrap();

    // Remote holds a zero-byte placeholder.
    let store = MemoryBlobStore::new();
    store.insert(KEY, Vec::new());

    let coordinator = SyncCoordinator::new(config.clone(), store);
    let db = coordinator.get_store().await.unwrap();

    assert!(!db.is_empty("entries"));
    assert_eq!(coordinator.remote().download_calls(), 0);
    assert_eq!(std::fs::read(&config.local_path).unwrap(), before);
}

#[tokio::test]
async fn cold_start_downloads_remote_blob() {
    let dir = tempdir().unwrap();
    let bytes = make_database_bytes(100);
    let store = MemoryBlobStore::new();
    store.insert(KEY, bytes.clone());

    let config = test_config(&dir);
    let coordinator = SyncCoordinator::new(config.clone(), store);
    let db = coordinator.get_store().await.unwrap();

    assert_eq!(coordinator.remote().download_calls(), 1);
    assert_eq!(db.size_on_disk(), bytes.len() as u64);
    assert!(!db.is_empty("entries"));
}

#[tokio::test]
async fn cold_start_skips_download_below_min_viable_size() {
    let dir = tempdir().unwrap();
    let store = MemoryBlobStore::new();
    store.insert(KEY, vec![0u8; 100]);

    let coordinator = SyncCoordinator::new(test_config(&dir), store);
    let db = coordinator.get_store().await.unwrap();

    assert_eq!(coordinator.remote().download_calls(), 0);
    assert!(db.is_empty("entries"));
}

#[tokio::test]
async fn cold_start_keeps_larger_local_file() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let local = LocalDatabase::open(&config.local_path).unwrap();
    local
        .with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE entries (id INTEGER PRIMARY KEY, body TEXT);
                 CREATE TABLE bulk (id INTEGER PRIMARY KEY, body BLOB);
                 INSERT INTO entries (body) VALUES ('local');
                 INSERT INTO bulk (body) VALUES (zeroblob(65536));",
            )
        })
        .unwrap();
    local.checkpoint().unwrap();
    let local_size = local.size_on_disk();
    drop(local);

    // Remote is viable but smaller than the local file.
    let remote_bytes = make_database_bytes(1);
    assert!((remote_bytes.len() as u64) < local_size);
    let store = MemoryBlobStore::new();
    store.insert(KEY, remote_bytes);

    let coordinator = SyncCoordinator::new(config.clone(), store);
    let db = coordinator.get_store().await.unwrap();

    assert_eq!(coordinator.remote().download_calls(), 0);
    assert_eq!(db.size_on_disk(), local_size);
}

#[tokio::test]
async fn shutdown_flushes_pending_changes_exactly_once() {
    let dir = tempdir().unwrap();
    let coordinator = SyncCoordinator::new(test_config(&dir), MemoryBlobStore::new());
    coordinator.get_store().await.unwrap();
    seed_viable(&coordinator, 50).await;

    coordinator.mark_changed();
    coordinator.flush_on_shutdown().await;

    assert_eq!(coordinator.remote().upload_calls(), 1);
    assert_eq!(coordinator.state(), EngineState::Stopped);
    assert!(!coordinator.tracker().has_changes());
}

#[tokio::test]
async fn shutdown_without_changes_skips_flush() {
    let dir = tempdir().unwrap();
    let coordinator = SyncCoordinator::new(test_config(&dir), MemoryBlobStore::new());
    coordinator.get_store().await.unwrap();
    seed_viable(&coordinator, 50).await;

    coordinator.flush_on_shutdown().await;

    assert_eq!(coordinator.remote().upload_calls(), 0);
    assert_eq!(coordinator.state(), EngineState::Stopped);
}

#[tokio::test]
async fn upload_then_fresh_process_recovers_identical_bytes() {
    // First "process": build data and upload it.
    let dir_a = tempdir().unwrap();
    let coordinator_a = SyncCoordinator::new(test_config(&dir_a), MemoryBlobStore::new());
    coordinator_a.get_store().await.unwrap();
    seed_viable(&coordinator_a, 200).await;
    let outcome = coordinator_a.sync().await.unwrap();
    assert!(outcome.uploaded());
    let blob = coordinator_a.remote().get(KEY).unwrap();

    // Second "process": no local file, same bucket contents.
    let dir_b = tempdir().unwrap();
    let store_b = MemoryBlobStore::new();
    store_b.insert(KEY, blob.clone());
    let coordinator_b = SyncCoordinator::new(test_config(&dir_b), store_b);
    let db = coordinator_b.get_store().await.unwrap();

    assert_eq!(db.size_on_disk(), blob.len() as u64);
    assert!(!db.is_empty("entries"));
}

#[tokio::test]
async fn periodic_timer_drives_sync() {
    let dir = tempdir().unwrap();
    let coordinator = Arc::new(SyncCoordinator::new(test_config(&dir), MemoryBlobStore::new()));
    coordinator.get_store().await.unwrap();
    seed_viable(&coordinator, 50).await;
    coordinator.mark_changed();

    let lifecycle = LifecycleManager::new();
    lifecycle.start_periodic_timer(Arc::clone(&coordinator), Duration::from_millis(20));
    // A second start is a no-op.
    lifecycle.start_periodic_timer(Arc::clone(&coordinator), Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(200)).await;
    lifecycle.shutdown();

    assert_eq!(coordinator.remote().upload_calls(), 1);
    assert!(!coordinator.tracker().has_changes());
}

#[tokio::test]
async fn fs_bucket_end_to_end() {
    let bucket = tempdir().unwrap();

    // Process one: create data and mirror it into the bucket directory.
    let dir_a = tempdir().unwrap();
    let coordinator_a =
        SyncCoordinator::new(test_config(&dir_a), FsBlobStore::new(bucket.path()));
    coordinator_a.get_store().await.unwrap();
    {
        let db = coordinator_a.get_store().await.unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE entries (id INTEGER PRIMARY KEY, body TEXT);
                 INSERT INTO entries (body) VALUES ('durable');",
            )
        })
        .unwrap();
        db.checkpoint().unwrap();
    }
    let outcome = coordinator_a.sync().await.unwrap();
    assert!(outcome.uploaded());
    assert!(bucket.path().join(KEY).exists());

    // Process two: cold start from the bucket alone.
    let dir_b = tempdir().unwrap();
    let coordinator_b =
        SyncCoordinator::new(test_config(&dir_b), FsBlobStore::new(bucket.path()));
    let db = coordinator_b.get_store().await.unwrap();

    assert!(!db.is_empty("entries"));
    let body: String = db
        .with_conn(|conn| conn.query_row("SELECT body FROM entries", [], |row| row.get(0)))
        .unwrap();
    assert_eq!(body, "durable");
}

//! Object-storage client abstraction.
//!
//! The engine talks to the bucket through the [`BlobStore`] trait so the
//! transport can be swapped (a real object store, a directory acting as a
//! local bucket, or an in-memory store for tests). Blobs are opaque bytes
//! addressed by a fixed key; the engine owns all interpretation.

use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A client for the object-storage bucket holding the database blob.
///
/// All operations are idempotent from the caller's perspective and safe to
/// retry. `delete` of an absent key is a no-op, not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns true if a blob exists at `key`.
    async fn exists(&self, key: &str) -> EngineResult<bool>;

    /// Returns the size of the blob at `key`, or 0 if it is absent.
    async fn size(&self, key: &str) -> EngineResult<u64>;

    /// Downloads the blob at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is absent or the transfer fails.
    async fn download(&self, key: &str) -> EngineResult<Vec<u8>>;

    /// Uploads `bytes` to `key`, replacing any existing blob.
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> EngineResult<()>;

    /// Deletes the blob at `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> EngineResult<()>;
}

/// Runs a remote call with a per-attempt timeout and linear backoff.
///
/// Non-retryable errors are returned immediately; retryable errors and
/// timeouts consume the attempt budget.
pub(crate) async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    timeout: Duration,
    op: &str,
    mut call: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..retry.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
        }

        match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if !e.is_retryable() || attempt + 1 == retry.max_attempts {
                    return Err(e);
                }
                warn!(op, attempt, error = %e, "remote operation failed, will retry");
                last_error = Some(e);
            }
            Err(_) => {
                if attempt + 1 == retry.max_attempts {
                    return Err(EngineError::Timeout(timeout));
                }
                warn!(op, attempt, "remote operation timed out, will retry");
                last_error = Some(EngineError::Timeout(timeout));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| EngineError::remote_fatal(format!("{op}: no attempts made"))))
}

/// A bucket backed by a local directory.
///
/// Each key maps to a file under the root directory. Useful for local
/// development and integration tests; metadata (content type, cache control)
/// is accepted and dropped, since the filesystem has nowhere to keep it.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at the given bucket directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the bucket root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> EngineResult<bool> {
        match tokio::fs::metadata(self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, key: &str) -> EngineResult<u64> {
        match tokio::fs::metadata(self.object_path(key)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn download(&self, key: &str) -> EngineResult<Vec<u8>> {
        match tokio::fs::read(self.object_path(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EngineError::remote_fatal(format!("no such object: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
        _cache_control: &str,
    ) -> EngineResult<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crashed upload never leaves a torn blob.
        let tmp = path.with_extension("upload-tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
    cache_control: String,
}

/// An in-memory bucket for tests.
///
/// Records call counts per operation and supports injecting a number of
/// failures before calls succeed again, so tests can exercise the retry and
/// guard paths.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredBlob>>,
    download_calls: AtomicU64,
    upload_calls: AtomicU64,
    delete_calls: AtomicU64,
    fail_downloads: AtomicU32,
    fail_uploads: AtomicU32,
}

impl MemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a blob with default metadata.
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.write().insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: "application/octet-stream".into(),
                cache_control: String::new(),
            },
        );
    }

    /// Returns the stored bytes for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).map(|b| b.bytes.clone())
    }

    /// Returns the stored content type for `key`, if any.
    #[must_use]
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|b| b.content_type.clone())
    }

    /// Returns the stored cache-control value for `key`, if any.
    #[must_use]
    pub fn cache_control(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .get(key)
            .map(|b| b.cache_control.clone())
    }

    /// Returns true if a blob exists at `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Number of `download` calls made so far.
    #[must_use]
    pub fn download_calls(&self) -> u64 {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Number of `upload` calls made so far.
    #[must_use]
    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls made so far.
    #[must_use]
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `n` downloads fail with a retryable error.
    pub fn fail_next_downloads(&self, n: u32) {
        self.fail_downloads.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` uploads fail with a retryable error.
    pub fn fail_next_uploads(&self, n: u32) {
        self.fail_uploads.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> EngineResult<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn size(&self, key: &str) -> EngineResult<u64> {
        Ok(self
            .objects
            .read()
            .get(key)
            .map(|b| b.bytes.len() as u64)
            .unwrap_or(0))
    }

    async fn download(&self, key: &str) -> EngineResult<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_downloads) {
            return Err(EngineError::remote_retryable("injected download failure"));
        }
        self.objects
            .read()
            .get(key)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| EngineError::remote_fatal(format!("no such object: {key}")))
    }

    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> EngineResult<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_uploads) {
            return Err(EngineError::remote_retryable("injected upload failure"));
        }
        self.objects.write().insert(
            key.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.objects.write().remove(key);
        Ok(())
    }
}

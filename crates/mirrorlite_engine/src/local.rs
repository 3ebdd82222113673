//! Local SQLite database file wrapper.
//!
//! The engine mirrors one database file; this module owns the connection to
//! it, the WAL checkpoint used to make the file self-consistent before an
//! upload, and the structural-emptiness probe used by the upload guards.

use crate::error::EngineResult;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Outcome of a WAL checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// The WAL was fully merged into the main file.
    Complete,
    /// Some WAL frames could not be merged (readers held the log open).
    Partial,
}

/// The local database file, opened once per process and retained until exit.
///
/// The connection runs in WAL mode so reads never block the data layer's
/// writes; [`LocalDatabase::checkpoint`] merges the log back into the main
/// file before the engine uploads it.
#[derive(Debug)]
pub struct LocalDatabase {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl LocalDatabase {
    /// Opens the database at `path`, creating the file (and parent
    /// directories) if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a SQLite
    /// database.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Returns the path of the main database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the main database file exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Returns the size of the main database file in bytes, 0 if absent.
    #[must_use]
    pub fn size_on_disk(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Merges the WAL into the main database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint pragma fails. Callers treat this
    /// as a warning, not a fatal condition.
    pub fn checkpoint(&self) -> EngineResult<Checkpoint> {
        let conn = self.conn.lock();
        let (busy, _log_frames, _checkpointed): (i64, i64, i64) =
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        Ok(if busy == 0 {
            Checkpoint::Complete
        } else {
            Checkpoint::Partial
        })
    }

    /// Returns true if the canary table has zero rows.
    ///
    /// A failed probe (the table does not exist, or the file is not a real
    /// database) also counts as empty: nothing worth uploading.
    #[must_use]
    pub fn is_empty(&self, canary_table: &str) -> bool {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\"",
            canary_table.replace('"', "\"\"")
        );
        match conn.query_row(&sql, [], |row| row.get::<_, i64>(0)) {
            Ok(count) => count == 0,
            Err(_) => true,
        }
    }

    /// Runs a closure against the underlying connection.
    ///
    /// This is the handle the data-access layer uses for its queries and
    /// mutations; the engine itself only checkpoints and probes.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> EngineResult<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }
}

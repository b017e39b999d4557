//! SQLite persistence for station metadata and snapshots
//!
//! Three tables back the whole system:
//!
//! - `stations` - provisioned metadata, read-only to the polling core
//! - `latest` - one current row per station, overwritten every cycle
//! - `usage` - append-only history keyed by (station, snapshot time)

pub mod repository;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::utils::error::StorageError;

pub use repository::{
    create_memory_repository, create_sqlite_repository, MemoryRepository, SharedRepository,
    SnapshotStore, StationRecord, StationRegistry, Store, SNAPSHOT_CHUNK_SIZE,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS stations (
        hash_id TEXT PRIMARY KEY,
        name TEXT,
        provider TEXT,
        campus_id INTEGER,
        campus_name TEXT,
        lat REAL,
        lon REAL,
        device_ids TEXT,
        updated_at INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_stations_provider
        ON stations(provider);

    CREATE TABLE IF NOT EXISTS latest (
        hash_id TEXT PRIMARY KEY,
        snapshot_time INTEGER NOT NULL,
        free INTEGER NOT NULL DEFAULT 0,
        used INTEGER NOT NULL DEFAULT 0,
        total INTEGER NOT NULL DEFAULT 0,
        error INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS usage (
        hash_id TEXT NOT NULL,
        snapshot_time INTEGER NOT NULL,
        free INTEGER NOT NULL DEFAULT 0,
        used INTEGER NOT NULL DEFAULT 0,
        total INTEGER NOT NULL DEFAULT 0,
        error INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (hash_id, snapshot_time)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_snapshot_time
        ON usage(snapshot_time);
"#;

/// SQLite database handle
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(db)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        Ok(db)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

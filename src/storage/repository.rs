//! Repository Pattern for Database Abstraction
//!
//! Trait-based access to station metadata and snapshots so the polling
//! pipeline and the read path never talk to SQLite directly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │   FetchOrchestrator  │        │  StatusQueryService  │
//! └──────────┬───────────┘        └──────────┬───────────┘
//!            │                               │
//!            ▼                               ▼
//! ┌──────────────────────────────────────────────────────┐
//! │         StationRegistry  +  SnapshotStore            │
//! └──────────────────────────────────────────────────────┘
//!            │                               │
//!            ▼                               ▼
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │  SQLite (Database)   │        │   MemoryRepository   │
//! └──────────────────────┘        └──────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::Database;
use crate::models::{
    device_ids_to_json, parse_device_ids, resolve_campus_name, StationMetadata, StationSnapshot,
};
use crate::utils::error::StorageError;

/// Rows per multi-row INSERT; keeps every statement under the backend's bound-parameter limit
pub const SNAPSHOT_CHUNK_SIZE: usize = 16;

/// Ids per `IN (...)` lookup
const ID_LOOKUP_CHUNK_SIZE: usize = 256;

type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Core Types
// ============================================================================

/// Raw `stations` row with the device-identifier column already normalized
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub hash_id: String,
    pub name: String,
    pub provider: String,
    pub campus_id: Option<i64>,
    pub campus_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub device_ids: Vec<String>,
    /// Epoch milliseconds of the last provisioning write
    pub updated_at: i64,
}

impl StationRecord {
    /// Convert to metadata, rejecting rows without an id, name, or provider
    pub fn to_metadata(&self) -> Option<StationMetadata> {
        let hash_id = self.hash_id.trim();
        let name = self.name.trim();
        let provider = self.provider.trim();

        if hash_id.is_empty() || name.is_empty() || provider.is_empty() {
            return None;
        }

        let campus_id = self.campus_id.unwrap_or(0);
        let campus_name = self
            .campus_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| resolve_campus_name(campus_id).to_string());

        Some(StationMetadata {
            hash_id: hash_id.to_string(),
            name: name.to_string(),
            provider: provider.to_string(),
            campus_id,
            campus_name,
            lat: self.lat.unwrap_or(0.0),
            lon: self.lon.unwrap_or(0.0),
            device_ids: self.device_ids.clone(),
        })
    }

    fn from_metadata(station: &StationMetadata, updated_at: i64) -> Self {
        let campus_name = if station.campus_name.trim().is_empty() {
            resolve_campus_name(station.campus_id).to_string()
        } else {
            station.campus_name.clone()
        };

        Self {
            hash_id: station.hash_id.clone(),
            name: station.name.clone(),
            provider: station.provider.clone(),
            campus_id: Some(station.campus_id),
            campus_name: Some(campus_name),
            lat: Some(station.lat),
            lon: Some(station.lon),
            device_ids: station.device_ids.clone(),
            updated_at,
        }
    }
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Read access to provisioned station metadata
pub trait StationRegistry: Send + Sync {
    /// All station rows, ordered by provider then name
    fn station_records(&self) -> Result<Vec<StationRecord>>;

    /// Distinct non-empty provider tags, ascending
    fn providers(&self) -> Result<Vec<String>>;

    /// Rows for exactly the given ids, optionally restricted to one provider
    fn metadata_by_ids(
        &self,
        hash_ids: &[String],
        provider: Option<&str>,
    ) -> Result<HashMap<String, StationRecord>>;

    /// Provisioning write; the polling core never calls this
    fn upsert_stations(&self, stations: &[StationMetadata], updated_at: i64) -> Result<usize>;

    /// Every usable station, sorted by provider then name.
    ///
    /// Malformed rows are logged and skipped.
    fn load_all(&self) -> Result<Vec<StationMetadata>> {
        let records = self.station_records()?;
        let mut stations = Vec::with_capacity(records.len());

        for record in &records {
            match record.to_metadata() {
                Some(station) => stations.push(station),
                None => tracing::warn!(
                    hash_id = %record.hash_id,
                    name = %record.name,
                    provider = %record.provider,
                    "Skipping station row without id, name, or provider"
                ),
            }
        }

        stations.sort_by(|a, b| (&a.provider, &a.name).cmp(&(&b.provider, &b.name)));
        Ok(stations)
    }
}

/// Persisted snapshot state: one latest row per station plus optional history
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the current row of every station in the batch
    fn upsert_latest(&self, snapshots: &[StationSnapshot]) -> Result<usize>;

    /// Insert history rows; an existing (station, time) row is updated in place
    fn append_history(&self, snapshots: &[StationSnapshot]) -> Result<usize>;

    /// Latest rows, optionally for a single station
    fn latest(&self, hash_id: Option<&str>) -> Result<Vec<StationSnapshot>>;

    /// History rows for one station, oldest first
    fn history(&self, hash_id: &str) -> Result<Vec<StationSnapshot>>;
}

/// Both halves of the store behind one handle
pub trait Store: StationRegistry + SnapshotStore {}

impl<T: StationRegistry + SnapshotStore> Store for T {}

/// Shared store handle
pub type SharedRepository = Arc<dyn Store>;

// ============================================================================
// SQLite Implementation
// ============================================================================

const STATION_COLUMNS: &str =
    "hash_id, name, provider, campus_id, campus_name, lat, lon, device_ids, updated_at";

const SNAPSHOT_COLUMNS: &str = "hash_id, snapshot_time, free, used, total, error";

fn station_from_row(row: &Row<'_>) -> rusqlite::Result<StationRecord> {
    let column = |idx: usize| row.get::<_, SqlValue>(idx);

    Ok(StationRecord {
        hash_id: sql_text(column(0)?).unwrap_or_default(),
        name: sql_text(column(1)?).unwrap_or_default(),
        provider: sql_text(column(2)?).unwrap_or_default(),
        campus_id: sql_number(&column(3)?).map(|n| n as i64),
        campus_name: sql_text(column(4)?),
        lat: sql_number(&column(5)?),
        lon: sql_number(&column(6)?),
        device_ids: parse_device_ids(&sql_to_json(column(7)?)),
        updated_at: sql_number(&column(8)?).map_or(0, |n| n as i64),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<StationSnapshot> {
    Ok(StationSnapshot {
        hash_id: sql_text(row.get(0)?).unwrap_or_default(),
        snapshot_time: sql_number(&row.get(1)?).map_or(0, |n| n as i64),
        free: count_column(row, 2)?,
        used: count_column(row, 3)?,
        total: count_column(row, 4)?,
        error: count_column(row, 5)?,
    })
}

fn count_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value = sql_number(&row.get(idx)?).unwrap_or(0.0);
    Ok(value.clamp(0.0, f64::from(u32::MAX)) as u32)
}

/// Text view of any stored value; NULL stays absent
fn sql_text(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s),
        SqlValue::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// Numeric view of a stored value; text that does not parse is absent
fn sql_number(value: &SqlValue) -> Option<f64> {
    let n = match value {
        SqlValue::Integer(i) => *i as f64,
        SqlValue::Real(f) => *f,
        SqlValue::Text(s) => s.trim().parse::<f64>().ok()?,
        SqlValue::Null | SqlValue::Blob(_) => return None,
    };
    n.is_finite().then_some(n)
}

/// Map whatever SQLite holds in the device column onto the JSON shapes the parser accepts
fn sql_to_json(value: SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(i) => serde_json::Value::from(i),
        SqlValue::Real(f) => serde_json::Value::from(f),
        SqlValue::Text(s) => serde_json::Value::String(s),
        SqlValue::Blob(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn snapshot_values(chunk: &[StationSnapshot]) -> Vec<SqlValue> {
    let mut values = Vec::with_capacity(chunk.len() * 6);
    for snapshot in chunk {
        values.push(SqlValue::Text(snapshot.hash_id.clone()));
        values.push(SqlValue::Integer(snapshot.snapshot_time));
        values.push(SqlValue::Integer(i64::from(snapshot.free)));
        values.push(SqlValue::Integer(i64::from(snapshot.used)));
        values.push(SqlValue::Integer(i64::from(snapshot.total)));
        values.push(SqlValue::Integer(i64::from(snapshot.error)));
    }
    values
}

fn placeholders(rows: usize, columns: usize) -> String {
    let row = format!("({})", vec!["?"; columns].join(", "));
    vec![row; rows].join(", ")
}

impl Database {
    fn write_snapshot_chunks(
        &self,
        snapshots: &[StationSnapshot],
        table: &str,
        conflict_target: &str,
    ) -> Result<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;

        for chunk in snapshots.chunks(SNAPSHOT_CHUNK_SIZE) {
            let sql = format!(
                "INSERT INTO {table} ({SNAPSHOT_COLUMNS}) VALUES {}
                 ON CONFLICT({conflict_target}) DO UPDATE SET
                    snapshot_time = excluded.snapshot_time,
                    free = excluded.free,
                    used = excluded.used,
                    total = excluded.total,
                    error = excluded.error",
                placeholders(chunk.len(), 6)
            );
            written += tx.execute(&sql, params_from_iter(snapshot_values(chunk)))?;
        }

        tx.commit()?;
        Ok(written)
    }

    fn query_snapshots(
        conn: &MutexGuard<'_, Connection>,
        sql: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StationSnapshot>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(bind, snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl StationRegistry for Database {
    fn station_records(&self) -> Result<Vec<StationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATION_COLUMNS} FROM stations ORDER BY provider ASC, name ASC"
        ))?;
        let rows = stmt
            .query_map([], station_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn providers(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT provider FROM stations
             WHERE provider IS NOT NULL AND TRIM(provider) != ''
             ORDER BY provider ASC",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn metadata_by_ids(
        &self,
        hash_ids: &[String],
        provider: Option<&str>,
    ) -> Result<HashMap<String, StationRecord>> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = hash_ids
            .iter()
            .filter(|id| !id.is_empty() && seen.insert(id.as_str()))
            .collect();

        let mut map = HashMap::with_capacity(unique.len());
        if unique.is_empty() {
            return Ok(map);
        }

        let conn = self.lock()?;
        for chunk in unique.chunks(ID_LOOKUP_CHUNK_SIZE) {
            let marks = vec!["?"; chunk.len()].join(",");
            let mut values: Vec<SqlValue> =
                chunk.iter().map(|id| SqlValue::Text((*id).clone())).collect();

            let sql = match provider {
                Some(p) => {
                    values.push(SqlValue::Text(p.to_string()));
                    format!(
                        "SELECT {STATION_COLUMNS} FROM stations WHERE hash_id IN ({marks}) AND provider = ? ORDER BY name ASC"
                    )
                }
                None => format!(
                    "SELECT {STATION_COLUMNS} FROM stations WHERE hash_id IN ({marks}) ORDER BY name ASC"
                ),
            };

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), station_from_row)?;
            for row in rows {
                let record = row?;
                map.insert(record.hash_id.clone(), record);
            }
        }

        Ok(map)
    }

    fn upsert_stations(&self, stations: &[StationMetadata], updated_at: i64) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO stations (hash_id, name, provider, campus_id, campus_name, lat, lon, device_ids, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(hash_id) DO UPDATE SET
                    name = excluded.name,
                    provider = excluded.provider,
                    campus_id = excluded.campus_id,
                    campus_name = excluded.campus_name,
                    lat = excluded.lat,
                    lon = excluded.lon,
                    device_ids = excluded.device_ids,
                    updated_at = excluded.updated_at
                "#,
            )?;

            for station in stations {
                let record = StationRecord::from_metadata(station, updated_at);
                written += stmt.execute(params![
                    record.hash_id,
                    record.name,
                    record.provider,
                    record.campus_id,
                    record.campus_name,
                    record.lat,
                    record.lon,
                    device_ids_to_json(&record.device_ids),
                    record.updated_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }
}

impl SnapshotStore for Database {
    fn upsert_latest(&self, snapshots: &[StationSnapshot]) -> Result<usize> {
        let written = self.write_snapshot_chunks(snapshots, "latest", "hash_id")?;
        tracing::debug!(rows = written, "Upserted latest snapshots");
        Ok(written)
    }

    fn append_history(&self, snapshots: &[StationSnapshot]) -> Result<usize> {
        self.write_snapshot_chunks(snapshots, "usage", "hash_id, snapshot_time")
    }

    fn latest(&self, hash_id: Option<&str>) -> Result<Vec<StationSnapshot>> {
        let conn = self.lock()?;
        match hash_id {
            Some(id) => Self::query_snapshots(
                &conn,
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM latest WHERE hash_id = ?1"),
                &[&id],
            ),
            None => Self::query_snapshots(
                &conn,
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM latest ORDER BY hash_id ASC"),
                &[],
            ),
        }
    }

    fn history(&self, hash_id: &str) -> Result<Vec<StationSnapshot>> {
        let conn = self.lock()?;
        Self::query_snapshots(
            &conn,
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM usage WHERE hash_id = ?1 ORDER BY snapshot_time ASC"
            ),
            &[&hash_id],
        )
    }
}

// ============================================================================
// In-memory Implementation (for testing)
// ============================================================================

#[derive(Default)]
struct MemoryState {
    stations: BTreeMap<String, StationRecord>,
    latest: Vec<StationSnapshot>,
    usage: BTreeMap<(String, i64), StationSnapshot>,
}

/// In-memory store with the same semantics as the SQLite one.
///
/// Reads and writes can be made to fail for exercising storage-error paths,
/// and raw latest rows can be injected to simulate a store that breaks the
/// one-row-per-station expectation.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Insert a station row verbatim, bypassing provisioning normalization
    pub fn insert_station_record(&self, record: StationRecord) {
        if let Ok(mut state) = self.state.lock() {
            state.stations.insert(record.hash_id.clone(), record);
        }
    }

    /// Append a latest row without replacing an existing one
    pub fn push_raw_latest(&self, snapshot: StationSnapshot) {
        if let Ok(mut state) = self.state.lock() {
            state.latest.push(snapshot);
        }
    }

    fn read(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected_failure("read"));
        }
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_failure("write"));
        }
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn injected_failure(op: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!("injected {op} failure")))
}

impl StationRegistry for MemoryRepository {
    fn station_records(&self) -> Result<Vec<StationRecord>> {
        let state = self.read()?;
        let mut rows: Vec<StationRecord> = state.stations.values().cloned().collect();
        rows.sort_by(|a, b| (&a.provider, &a.name).cmp(&(&b.provider, &b.name)));
        Ok(rows)
    }

    fn providers(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut providers: Vec<String> = state
            .stations
            .values()
            .map(|r| r.provider.clone())
            .filter(|p| !p.trim().is_empty())
            .collect();
        providers.sort();
        providers.dedup();
        Ok(providers)
    }

    fn metadata_by_ids(
        &self,
        hash_ids: &[String],
        provider: Option<&str>,
    ) -> Result<HashMap<String, StationRecord>> {
        let state = self.read()?;
        Ok(hash_ids
            .iter()
            .filter_map(|id| state.stations.get(id))
            .filter(|r| provider.map_or(true, |p| r.provider == p))
            .map(|r| (r.hash_id.clone(), r.clone()))
            .collect())
    }

    fn upsert_stations(&self, stations: &[StationMetadata], updated_at: i64) -> Result<usize> {
        let mut state = self.write()?;
        for station in stations {
            state.stations.insert(
                station.hash_id.clone(),
                StationRecord::from_metadata(station, updated_at),
            );
        }
        Ok(stations.len())
    }
}

impl SnapshotStore for MemoryRepository {
    fn upsert_latest(&self, snapshots: &[StationSnapshot]) -> Result<usize> {
        let mut state = self.write()?;
        for snapshot in snapshots {
            match state.latest.iter_mut().find(|s| s.hash_id == snapshot.hash_id) {
                Some(existing) => *existing = snapshot.clone(),
                None => state.latest.push(snapshot.clone()),
            }
        }
        Ok(snapshots.len())
    }

    fn append_history(&self, snapshots: &[StationSnapshot]) -> Result<usize> {
        let mut state = self.write()?;
        for snapshot in snapshots {
            state.usage.insert(
                (snapshot.hash_id.clone(), snapshot.snapshot_time),
                snapshot.clone(),
            );
        }
        Ok(snapshots.len())
    }

    fn latest(&self, hash_id: Option<&str>) -> Result<Vec<StationSnapshot>> {
        let state = self.read()?;
        Ok(state
            .latest
            .iter()
            .filter(|s| hash_id.map_or(true, |id| s.hash_id == id))
            .cloned()
            .collect())
    }

    fn history(&self, hash_id: &str) -> Result<Vec<StationSnapshot>> {
        let state = self.read()?;
        Ok(state
            .usage
            .values()
            .filter(|s| s.hash_id == hash_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Open the SQLite store as a shared handle
pub fn create_sqlite_repository(path: impl AsRef<Path>) -> Result<SharedRepository> {
    Ok(Arc::new(Database::open(path)?))
}

/// Create an in-memory shared handle (for testing)
pub fn create_memory_repository() -> SharedRepository {
    Arc::new(MemoryRepository::new())
}

// ============================================================================
// Tests
// ============================================================================

//! Read-side status queries
//!
//! [`StatusQueryService`] joins the latest snapshots with station metadata,
//! applies caller filters, and computes the response watermark. It holds no
//! state between calls.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{epoch_ms_to_iso, now_ms, FormattedStationStatus};
use crate::storage::{SharedRepository, StationRecord};
use crate::utils::error::StorageError;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to read-path callers
#[derive(Error, Debug)]
pub enum QueryError {
    /// Filter value does not match its format
    #[error("{field} parameter is malformed: {message}")]
    InvalidFilter {
        field: &'static str,
        message: &'static str,
    },

    /// Sub-device ids are only unique within a provider
    #[error("devid filter requires a provider filter")]
    DevidWithoutProvider,

    /// Filters matched nothing
    #[error("No matching station or device")]
    NotFound,

    /// No station-level data exists yet
    #[error("Station status is not available")]
    Unavailable,

    /// Store failure
    #[error("Store query failed: {0}")]
    Storage(#[from] StorageError),
}

impl QueryError {
    /// HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidFilter { .. } => 422,
            Self::DevidWithoutProvider => 400,
            Self::NotFound => 404,
            Self::Unavailable => 503,
            Self::Storage(_) => 500,
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

fn provider_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").expect("valid provider regex"))
}

fn hash_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{8}$").expect("valid hash id regex"))
}

fn devid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_, -]{1,64}$").expect("valid devid regex"))
}

/// Optional filters for a status query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFilter {
    pub provider: Option<String>,
    pub hash_id: Option<String>,
    pub devid: Option<String>,
}

impl StatusFilter {
    /// Build a filter from raw query values; empty strings count as absent
    pub fn new(provider: Option<&str>, hash_id: Option<&str>, devid: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            provider: present(provider),
            hash_id: present(hash_id),
            devid: present(devid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.provider.is_none() && self.hash_id.is_none() && self.devid.is_none()
    }

    /// Check every filter's format, then the devid/provider pairing
    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(provider) = &self.provider {
            if !provider_pattern().is_match(provider) {
                return Err(QueryError::InvalidFilter {
                    field: "provider",
                    message: "only letters, digits, underscore and hyphen are allowed (1-32 chars)",
                });
            }
        }

        if let Some(hash_id) = &self.hash_id {
            if !hash_id_pattern().is_match(hash_id) {
                return Err(QueryError::InvalidFilter {
                    field: "hash_id",
                    message: "must be an 8-character hexadecimal string",
                });
            }
        }

        if let Some(devid) = &self.devid {
            if !devid_pattern().is_match(devid) {
                return Err(QueryError::InvalidFilter {
                    field: "devid",
                    message: "invalid device identifier",
                });
            }
            if self.provider.is_none() {
                return Err(QueryError::DevidWithoutProvider);
            }
        }

        Ok(())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Body of a successful status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// ISO-8601 watermark: newest snapshot among the returned rows
    pub updated_at: String,
    pub stations: Vec<FormattedStationStatus>,
}

/// One provider entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

/// Station metadata as listed by the read API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: String,
    pub name: String,
    pub devdescript: String,
    pub provider: String,
    pub campus_id: Option<i64>,
    pub campus_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub devids: Vec<String>,
}

impl From<StationRecord> for StationInfo {
    fn from(record: StationRecord) -> Self {
        Self {
            id: record.hash_id,
            devdescript: record.name.clone(),
            name: record.name,
            provider: record.provider,
            campus_id: record.campus_id,
            campus_name: record.campus_name,
            latitude: record.lat,
            longitude: record.lon,
            devids: record.device_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationsResponse {
    pub updated_at: String,
    pub stations: Vec<StationInfo>,
}

fn iso_or_now(ms: i64) -> String {
    epoch_ms_to_iso(ms)
        .or_else(|| epoch_ms_to_iso(now_ms()))
        .unwrap_or_default()
}

// ============================================================================
// Service
// ============================================================================

/// Stateless read-path service over the shared store
#[derive(Clone)]
pub struct StatusQueryService {
    store: SharedRepository,
}

impl StatusQueryService {
    pub fn new(store: SharedRepository) -> Self {
        Self { store }
    }

    /// Filtered current status.
    ///
    /// # Errors
    ///
    /// - `InvalidFilter` / `DevidWithoutProvider` for bad input
    /// - `NotFound` when a filter was given and nothing matched
    /// - `Unavailable` when no filter was given and nothing is stored
    /// - `Storage` on store failure
    pub fn status(&self, filter: &StatusFilter) -> Result<StatusResponse, QueryError> {
        filter.validate()?;

        let empty_result = || {
            if filter.is_empty() {
                QueryError::Unavailable
            } else {
                QueryError::NotFound
            }
        };

        let rows = self.store.latest(filter.hash_id.as_deref())?;
        if rows.is_empty() {
            return Err(empty_result());
        }

        let ids: Vec<String> = rows.iter().map(|r| r.hash_id.clone()).collect();
        let metadata = self
            .store
            .metadata_by_ids(&ids, filter.provider.as_deref())?;

        let mut seen = HashSet::new();
        let mut stations = Vec::new();
        let mut watermark: Option<i64> = None;

        for row in rows {
            if seen.contains(&row.hash_id) {
                continue;
            }

            let meta = metadata.get(&row.hash_id);
            if filter.provider.is_some() && meta.is_none() {
                continue;
            }

            let devids = meta.map(|m| m.device_ids.clone()).unwrap_or_default();
            if let Some(devid) = &filter.devid {
                if !devids.iter().any(|d| d == devid) {
                    continue;
                }
            }

            watermark = Some(watermark.map_or(row.snapshot_time, |w| w.max(row.snapshot_time)));
            seen.insert(row.hash_id.clone());

            stations.push(FormattedStationStatus {
                id: row.hash_id.clone(),
                name: meta.map_or_else(|| row.hash_id.clone(), |m| m.name.clone()),
                provider: meta.map(|m| m.provider.clone()),
                campus_id: meta.and_then(|m| m.campus_id),
                campus_name: meta.and_then(|m| m.campus_name.clone()),
                lat: meta.and_then(|m| m.lat),
                lon: meta.and_then(|m| m.lon),
                devids,
                free: row.free,
                used: row.used,
                total: row.total,
                error: row.error,
                hash_id: row.hash_id,
            });
        }

        match watermark {
            Some(ms) => Ok(StatusResponse {
                updated_at: iso_or_now(ms),
                stations,
            }),
            None => Err(empty_result()),
        }
    }

    /// Distinct provider tags, ascending
    pub fn providers(&self) -> Result<Vec<ProviderInfo>, QueryError> {
        Ok(self
            .store
            .providers()?
            .into_iter()
            .map(|p| ProviderInfo {
                id: p.clone(),
                name: p,
            })
            .collect())
    }

    /// All station metadata; `Unavailable` when the table is empty or unreadable
    pub fn stations(&self) -> Result<StationsResponse, QueryError> {
        let records = self.store.station_records().map_err(|e| {
            tracing::error!(error = %e, "Failed to load stations");
            QueryError::Unavailable
        })?;

        if records.is_empty() {
            return Err(QueryError::Unavailable);
        }

        let updated_at = records.iter().map(|r| r.updated_at).max().unwrap_or(0);

        Ok(StationsResponse {
            updated_at: iso_or_now(updated_at),
            stations: records.into_iter().map(StationInfo::from).collect(),
        })
    }
}

// Core data structures for the station status tracker

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Campus id to display name, used when provisioning leaves the name blank.
pub const CAMPUS_NAMES: &[(i64, &str)] = &[
    (1, "玉泉校区"),
    (2, "紫金港校区"),
    (3, "华家池校区"),
    (4, "西溪校区"),
    (5, "之江校区"),
];

/// Resolve a campus id to its display name (empty when unknown)
pub fn resolve_campus_name(campus_id: i64) -> &'static str {
    CAMPUS_NAMES
        .iter()
        .find(|(id, _)| *id == campus_id)
        .map(|(_, name)| *name)
        .unwrap_or("")
}

/// Identity record for one station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub hash_id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub campus_id: i64,
    #[serde(default)]
    pub campus_name: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    /// Provider-specific sub-device handles, in stored order
    #[serde(default, deserialize_with = "deserialize_device_ids")]
    pub device_ids: Vec<String>,
}

impl StationMetadata {
    /// Display label used in log lines
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }
}

/// Availability counts for one station.
///
/// `total` is whatever the adapter reports; it does not have to equal
/// `free + used + error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub free: u32,
    pub used: u32,
    pub total: u32,
    pub error: u32,
}

impl Usage {
    /// All-zero counts
    pub const fn zero() -> Self {
        Self {
            free: 0,
            used: 0,
            total: 0,
            error: 0,
        }
    }

    /// Accumulate counts from another sub-device
    pub fn add(&mut self, other: Usage) {
        self.free = self.free.saturating_add(other.free);
        self.used = self.used.saturating_add(other.used);
        self.total = self.total.saturating_add(other.total);
        self.error = self.error.saturating_add(other.error);
    }
}

/// Point-in-time measurement for one station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub hash_id: String,
    /// Milliseconds since the Unix epoch
    pub snapshot_time: i64,
    pub free: u32,
    pub used: u32,
    pub total: u32,
    pub error: u32,
}

impl StationSnapshot {
    pub fn new(hash_id: impl Into<String>, snapshot_time: i64, usage: Usage) -> Self {
        Self {
            hash_id: hash_id.into(),
            snapshot_time,
            free: usage.free,
            used: usage.used,
            total: usage.total,
            error: usage.error,
        }
    }

    pub fn usage(&self) -> Usage {
        Usage {
            free: self.free,
            used: self.used,
            total: self.total,
            error: self.error,
        }
    }
}

/// Station status as returned by the read API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedStationStatus {
    pub hash_id: String,
    pub id: String,
    pub name: String,
    pub provider: Option<String>,
    pub campus_id: Option<i64>,
    pub campus_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub devids: Vec<String>,
    pub free: u32,
    pub used: u32,
    pub total: u32,
    pub error: u32,
}

// ============================================================================
// Device identifiers
// ============================================================================

/// Normalize a device-identifier value of any at-rest encoding.
///
/// Accepts a native JSON list, a JSON-array string, a semicolon-delimited
/// string, or a single scalar. Entries are trimmed and empty ones dropped.
/// Unparseable input yields an empty list, never an error.
pub fn parse_device_ids(raw: &serde_json::Value) -> Vec<String> {
    use serde_json::Value;

    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => normalize_items(items),
        Value::String(text) => parse_device_ids_str(text),
        Value::Bool(b) => vec![b.to_string()],
        Value::Number(n) => vec![n.to_string()],
        Value::Object(_) => Vec::new(),
    }
}

/// String form of [`parse_device_ids`]
pub fn parse_device_ids_str(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(trimmed) {
            return normalize_items(&items);
        }
        // Not valid JSON: fall through to the delimited form.
    }

    trimmed
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_items(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string().trim().to_string()),
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Canonical at-rest encoding (JSON array string)
pub fn device_ids_to_json(device_ids: &[String]) -> String {
    serde_json::to_string(device_ids).unwrap_or_else(|_| String::from("[]"))
}

fn deserialize_device_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_device_ids(&raw))
}

// ============================================================================
// Time helpers
// ============================================================================

/// Current time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to an RFC 3339 UTC string with millisecond precision
pub fn epoch_ms_to_iso(value: i64) -> Option<String> {
    let dt: DateTime<Utc> = Utc.timestamp_millis_opt(value).single()?;
    Some(dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

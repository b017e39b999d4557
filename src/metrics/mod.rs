//! Prometheus metrics for the fetch cycle and the read API
//!
//! This module provides metrics tracking for:
//! - Fetch cycles: outcomes, durations, quota stops, per-provider station results
//! - Read API: requests by endpoint and status, request latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Fetch-side metrics
struct FetchMetrics {
    cycles: CounterVec,
    cycle_duration: Histogram,
    station_fetches: CounterVec,
    quota_stops: Counter,
}

/// Read API metrics
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

static FETCH_METRICS: OnceLock<FetchMetrics> = OnceLock::new();

static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// If registration fails the error is returned and every recording
/// function below stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let fetch = FetchMetrics {
        cycles: register_counter_vec!(
            "charger_cycles_total",
            "Fetch cycles by outcome",
            &["outcome"]
        )?,
        cycle_duration: register_histogram!(
            "charger_cycle_duration_seconds",
            "Wall time of one fetch cycle in seconds",
            vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
        )?,
        station_fetches: register_counter_vec!(
            "charger_station_fetches_total",
            "Station fetch attempts by provider and outcome",
            &["provider", "outcome"]
        )?,
        quota_stops: register_counter!(
            "charger_quota_stops_total",
            "Cycles cut short by the outbound call quota"
        )?,
    };

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "charger_api_requests_total",
            "Read API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        duration: register_histogram_vec!(
            "charger_api_request_duration_seconds",
            "Read API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        )?,
    };

    FETCH_METRICS.set(fetch).map_err(|_| "Fetch metrics already initialized")?;
    API_METRICS.set(api).map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    FETCH_METRICS.get().is_some() && API_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a finished (or skipped) cycle
pub fn record_cycle(outcome: &str) {
    if let Some(m) = FETCH_METRICS.get() {
        m.cycles.with_label_values(&[outcome]).inc();
    }
}

pub fn observe_cycle_duration(secs: f64) {
    if let Some(m) = FETCH_METRICS.get() {
        m.cycle_duration.observe(secs);
    }
}

/// Record one station's fetch result
pub fn record_station_fetch(provider: &str, outcome: &str) {
    if let Some(m) = FETCH_METRICS.get() {
        m.station_fetches
            .with_label_values(&[provider, outcome])
            .inc();
    }
}

pub fn record_quota_stop() {
    if let Some(m) = FETCH_METRICS.get() {
        m.quota_stops.inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================

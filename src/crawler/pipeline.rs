//! Worker-pool fetch orchestration for one polling cycle
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │  rotated station list    │
//!                  └────────────┬─────────────┘
//!                               │  shared cursor (AtomicUsize)
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//!   ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!   │  Worker 0   │      │  Worker 1   │ ...  │  Worker N   │
//!   └──────┬──────┘      └──────┬──────┘      └──────┬──────┘
//!          │     AdapterRegistry + CycleContext      │
//!          └────────────────────┬────────────────────┘
//!                               │  stop flag (AtomicBool) on quota
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  successful snapshots    │
//!                  └──────────────────────────┘
//! ```
//!
//! Workers claim stations one at a time from the cursor and check the stop
//! flag before every claim. Results are collected only after all workers
//! have exited; nothing is written while the cycle is still running.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::context::CycleContext;
use super::providers::AdapterRegistry;
use crate::config::{DEFAULT_FETCH_CONCURRENCY, MAX_FETCH_CONCURRENCY};
use crate::metrics;
use crate::models::{StationMetadata, StationSnapshot};
use crate::utils::error::FetchError;

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Requested worker count (clamped to `1..=MAX_FETCH_CONCURRENCY`)
    pub concurrency: usize,

    /// Deadline for one station's adapter call, all sub-devices included
    pub station_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            station_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Configured concurrency after applying the hard ceiling
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_FETCH_CONCURRENCY)
    }

    /// Worker count actually used for `station_count` stations
    pub fn worker_count(&self, station_count: usize) -> usize {
        self.effective_concurrency().min(station_count)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-cycle fetch statistics (thread-safe)
#[derive(Debug, Default)]
pub struct FetchStats {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
}

impl FetchStats {
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Result of one orchestrated cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Successful snapshots, in rotated station order
    pub snapshots: Vec<StationSnapshot>,

    /// Whether the quota signal stopped the cycle early
    pub stopped_by_quota: bool,

    /// Workers launched
    pub workers: usize,

    pub stats: FetchStatsSnapshot,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives one polling cycle across a bounded worker pool
pub struct FetchOrchestrator {
    registry: Arc<AdapterRegistry>,
    config: OrchestratorConfig,
}

struct WorkerShared {
    stations: Vec<StationMetadata>,
    registry: Arc<AdapterRegistry>,
    ctx: Arc<CycleContext>,
    cursor: AtomicUsize,
    stop: AtomicBool,
    stats: FetchStats,
    station_timeout: Duration,
}

impl FetchOrchestrator {
    pub fn new(registry: Arc<AdapterRegistry>, config: OrchestratorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Poll every station once (or until the quota stops the cycle).
    ///
    /// `stations` must already be in the order they should be claimed.
    pub async fn run(&self, stations: Vec<StationMetadata>, ctx: Arc<CycleContext>) -> CycleOutcome {
        let worker_count = self.config.worker_count(stations.len());
        if worker_count == 0 {
            return CycleOutcome {
                snapshots: Vec::new(),
                stopped_by_quota: false,
                workers: 0,
                stats: FetchStatsSnapshot::default(),
            };
        }

        tracing::debug!(
            stations = stations.len(),
            workers = worker_count,
            "Starting fetch workers"
        );

        let shared = Arc::new(WorkerShared {
            stations,
            registry: Arc::clone(&self.registry),
            ctx,
            cursor: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            stats: FetchStats::default(),
            station_timeout: self.config.station_timeout,
        });

        let handles: Vec<JoinHandle<Vec<(usize, StationSnapshot)>>> = (0..worker_count)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { run_worker(worker_id, &shared).await })
            })
            .collect();

        let mut collected = Vec::with_capacity(shared.stations.len());
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(results) => collected.extend(results),
                Err(e) => tracing::error!(error = %e, "Fetch worker aborted"),
            }
        }

        collected.sort_by_key(|(index, _)| *index);

        CycleOutcome {
            snapshots: collected.into_iter().map(|(_, snapshot)| snapshot).collect(),
            stopped_by_quota: shared.stop.load(Ordering::SeqCst),
            workers: worker_count,
            stats: shared.stats.snapshot(),
        }
    }
}

async fn run_worker(worker_id: usize, shared: &WorkerShared) -> Vec<(usize, StationSnapshot)> {
    let mut results = Vec::new();

    while !shared.stop.load(Ordering::SeqCst) {
        let index = shared.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(station) = shared.stations.get(index) else {
            break;
        };

        let call = shared.registry.fetch_usage(station, &shared.ctx);
        match tokio::time::timeout(shared.station_timeout, call).await {
            Ok(Ok(usage)) => {
                shared.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                metrics::record_station_fetch(&station.provider, "success");
                results.push((
                    index,
                    StationSnapshot::new(&station.hash_id, shared.ctx.snapshot_time(), usage),
                ));
            }
            Ok(Err(FetchError::QuotaExhausted)) => {
                shared.stop.store(true, Ordering::SeqCst);
                metrics::record_station_fetch(&station.provider, "quota");
                tracing::warn!(
                    worker_id,
                    station = %station.hash_id,
                    "Outbound call quota reached; keeping partial results only"
                );
                break;
            }
            Ok(Err(e)) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_station_fetch(&station.provider, "error");
                tracing::error!(
                    worker_id,
                    station = %station.hash_id,
                    label = %station.label(),
                    error = %e,
                    "Station fetch failed"
                );
            }
            Err(_) => {
                shared.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                metrics::record_station_fetch(&station.provider, "timeout");
                tracing::warn!(
                    worker_id,
                    station = %station.hash_id,
                    label = %station.label(),
                    timeout_ms = shared.station_timeout.as_millis() as u64,
                    "Station fetch timed out"
                );
            }
        }
    }

    tracing::debug!(worker_id, fetched = results.len(), "Fetch worker finished");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::providers::ProviderAdapter;
    use crate::models::Usage;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Adapter that records peak concurrency and claim order
    struct TrackingAdapter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl TrackingAdapter {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                delay,
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for TrackingAdapter {
        fn tag(&self) -> &str {
            "tracking"
        }

        async fn fetch_device(
            &self,
            _device_id: &str,
            _session: &str,
            _ctx: &CycleContext,
        ) -> Result<Usage, FetchError> {
            Ok(Usage::zero())
        }

        async fn fetch_usage(
            &self,
            station: &StationMetadata,
            _ctx: &CycleContext,
        ) -> Result<Usage, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(station.hash_id.clone());

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if station.name == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if station.name == "broken" {
                return Err(FetchError::Status(502));
            }

            Ok(Usage {
                free: 1,
                used: 0,
                total: 1,
                error: 0,
            })
        }
    }

    fn stations(names: &[&str]) -> Vec<StationMetadata> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| StationMetadata {
                hash_id: format!("{i:08x}"),
                name: name.to_string(),
                provider: "tracking".to_string(),
                campus_id: 1,
                campus_name: String::new(),
                lat: 0.0,
                lon: 0.0,
                device_ids: vec!["d".to_string()],
            })
            .collect()
    }

    fn orchestrator(adapter: Arc<TrackingAdapter>, concurrency: usize) -> FetchOrchestrator {
        let mut registry = AdapterRegistry::new();
        registry.register_arc(adapter);
        FetchOrchestrator::new(
            Arc::new(registry),
            OrchestratorConfig {
                concurrency,
                station_timeout: Duration::from_millis(500),
            },
        )
    }

    #[test]
    fn test_worker_count() {
        let config = OrchestratorConfig {
            concurrency: 10,
            ..Default::default()
        };
        assert_eq!(config.worker_count(100), MAX_FETCH_CONCURRENCY);
        assert_eq!(config.worker_count(3), 3);
        assert_eq!(config.worker_count(0), 0);

        let zero = OrchestratorConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(zero.worker_count(5), 1);
    }

    #[tokio::test]
    async fn test_concurrency_cap_and_single_claim() {
        let adapter = Arc::new(TrackingAdapter::new(Duration::from_millis(30)));
        let orch = orchestrator(Arc::clone(&adapter), 4);

        let input = stations(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        let outcome = orch.run(input, Arc::new(CycleContext::new(42, None))).await;

        assert_eq!(outcome.workers, 4);
        assert_eq!(outcome.snapshots.len(), 10);
        assert!(adapter.peak.load(Ordering::SeqCst) <= 4);

        let seen = adapter.seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(seen.len(), 10);
        assert_eq!(unique.len(), 10);
        assert!(outcome.snapshots.iter().all(|s| s.snapshot_time == 42));
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_do_not_abort_cycle() {
        let adapter = Arc::new(TrackingAdapter::new(Duration::from_millis(1)));
        let orch = orchestrator(adapter, 2);

        let input = stations(&["ok", "broken", "slow", "fine"]);
        let outcome = orch.run(input, Arc::new(CycleContext::new(1, None))).await;

        let ids: Vec<&str> = outcome.snapshots.iter().map(|s| s.hash_id.as_str()).collect();
        assert_eq!(ids, vec!["00000000", "00000003"]);
        assert!(!outcome.stopped_by_quota);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.timed_out, 1);
    }

    #[tokio::test]
    async fn test_empty_station_list() {
        let adapter = Arc::new(TrackingAdapter::new(Duration::ZERO));
        let orch = orchestrator(adapter, 4);

        let outcome = orch.run(Vec::new(), Arc::new(CycleContext::new(0, None))).await;
        assert!(outcome.snapshots.is_empty());
        assert_eq!(outcome.workers, 0);
    }
}

//! Cycle runner and time-based trigger
//!
//! [`CycleRunner::run_cycle`] is the single entry point for one polling
//! cycle, used by the interval trigger, `POST /run`, and the `run` CLI
//! command alike. Cycles never overlap: a second request waits for the one
//! in progress to finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::rotation::rotate_for_cycle;
use crate::config::{Config, FetcherConfig};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::JsonFetcher;
use crate::crawler::pipeline::{FetchOrchestrator, OrchestratorConfig};
use crate::crawler::providers::{AdapterRegistry, ProviderEndpoints};
use crate::error::{ChargerErrorTrait, Result};
use crate::metrics;
use crate::storage::SharedRepository;

/// Local wall-clock offset used for the night pause (UTC+8)
const NIGHT_PAUSE_UTC_OFFSET_SECS: i32 = 8 * 3600;

// ============================================================================
// Night pause
// ============================================================================

/// Whether `now` falls in 00:10–05:50 (inclusive) UTC+8, when upstreams are
/// idle and polling is skipped
pub fn is_night_pause_window(now: DateTime<Utc>) -> bool {
    let Some(offset) = FixedOffset::east_opt(NIGHT_PAUSE_UTC_OFFSET_SECS) else {
        return false;
    };
    let local = now.with_timezone(&offset);
    let (hour, minute) = (local.hour(), local.minute());

    match hour {
        0 => minute >= 10,
        1..=4 => true,
        5 => minute <= 50,
        _ => false,
    }
}

// ============================================================================
// Cycle report
// ============================================================================

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub station_count: usize,
    pub fetched_count: usize,
    pub concurrency: usize,
    pub duration_ms: u64,
    pub history_enabled: bool,
    pub stopped_by_quota: bool,
    /// Whether the snapshots reached the store
    pub persisted: bool,
    /// Whether the cycle was skipped by the night pause
    pub skipped: bool,
}

impl CycleReport {
    fn outcome_label(&self) -> &'static str {
        if self.skipped {
            "skipped"
        } else if self.fetched_count == 0 {
            "empty"
        } else if !self.persisted {
            "persist_failed"
        } else if self.stopped_by_quota {
            "partial"
        } else {
            "complete"
        }
    }
}

// ============================================================================
// Cycle runner
// ============================================================================

/// Settings that shape one cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub cycle_interval: Duration,
    pub max_outbound_calls: Option<usize>,
    pub history_enabled: bool,
    pub night_pause: bool,
}

impl CycleSettings {
    pub fn from_fetcher_config(config: &FetcherConfig) -> Self {
        Self {
            cycle_interval: Duration::from_secs(config.cycle_interval_secs.max(1)),
            max_outbound_calls: config.max_outbound_calls,
            history_enabled: config.history_enabled,
            night_pause: config.night_pause,
        }
    }
}

/// Runs polling cycles against a store
pub struct CycleRunner {
    store: SharedRepository,
    orchestrator: FetchOrchestrator,
    settings: CycleSettings,
    running: Mutex<()>,
}

impl CycleRunner {
    pub fn new(
        store: SharedRepository,
        orchestrator: FetchOrchestrator,
        settings: CycleSettings,
    ) -> Self {
        Self {
            store,
            orchestrator,
            settings,
            running: Mutex::new(()),
        }
    }

    /// Runner with every production adapter wired from configuration
    pub fn from_config(config: &Config, store: SharedRepository) -> Result<Self> {
        Self::with_endpoints(config, store, &ProviderEndpoints::default())
    }

    /// Same as [`from_config`](Self::from_config) with custom upstream base URLs
    pub fn with_endpoints(
        config: &Config,
        store: SharedRepository,
        endpoints: &ProviderEndpoints,
    ) -> Result<Self> {
        let http = JsonFetcher::new(config.request_timeout())?;
        let registry = AdapterRegistry::standard(http, &config.credentials, endpoints);

        let orchestrator = FetchOrchestrator::new(
            Arc::new(registry),
            OrchestratorConfig {
                concurrency: config.resolved_concurrency(),
                station_timeout: config.station_timeout(),
            },
        );

        Ok(Self::new(
            store,
            orchestrator,
            CycleSettings::from_fetcher_config(&config.fetcher),
        ))
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one cycle now
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as if the wall clock read `now`.
    ///
    /// # Errors
    ///
    /// Only a failure to load stations is returned. Persistence failures are
    /// logged and reported through [`CycleReport::persisted`].
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let _guard = self.running.lock().await;

        let mut report = CycleReport {
            concurrency: self.orchestrator.config().effective_concurrency(),
            history_enabled: self.settings.history_enabled,
            ..CycleReport::default()
        };

        if self.settings.night_pause && is_night_pause_window(now) {
            tracing::info!("Skipping fetch cycle in UTC+8 night pause window (00:10-05:50)");
            report.skipped = true;
            metrics::record_cycle(report.outcome_label());
            return Ok(report);
        }

        let started = Instant::now();
        let stations = self.store.load_all()?;
        report.station_count = stations.len();

        if stations.is_empty() {
            tracing::warn!("No stations loaded from store");
            metrics::record_cycle(report.outcome_label());
            return Ok(report);
        }

        let snapshot_time = now.timestamp_millis();
        let ordered = rotate_for_cycle(stations, snapshot_time, self.settings.cycle_interval);
        let ctx = Arc::new(CycleContext::new(
            snapshot_time,
            self.settings.max_outbound_calls,
        ));

        let outcome = self.orchestrator.run(ordered, Arc::clone(&ctx)).await;
        report.fetched_count = outcome.snapshots.len();
        report.stopped_by_quota = outcome.stopped_by_quota;

        if outcome.stopped_by_quota {
            metrics::record_quota_stop();
        }

        if outcome.snapshots.is_empty() {
            tracing::warn!("No successful snapshots collected in this cycle; skipping store write");
        } else {
            report.persisted = self.persist(&outcome.snapshots);
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        metrics::record_cycle(report.outcome_label());
        metrics::observe_cycle_duration(elapsed.as_secs_f64());

        tracing::info!(
            event = "fetch_cycle_complete",
            station_count = report.station_count,
            fetched_count = report.fetched_count,
            concurrency = report.concurrency,
            duration_ms = report.duration_ms,
            history_enabled = report.history_enabled,
            stopped_by_quota = report.stopped_by_quota,
            outbound_calls = ctx.budget().used(),
            failed = outcome.stats.failed,
            timed_out = outcome.stats.timed_out,
            "Fetch cycle complete"
        );

        Ok(report)
    }

    fn persist(&self, snapshots: &[crate::models::StationSnapshot]) -> bool {
        if let Err(e) = self.store.upsert_latest(snapshots) {
            tracing::error!(error = %e, rows = snapshots.len(), "Failed to upsert latest snapshots");
            return false;
        }

        if self.settings.history_enabled {
            if let Err(e) = self.store.append_history(snapshots) {
                tracing::error!(error = %e, rows = snapshots.len(), "Failed to append snapshot history");
                return false;
            }
        }

        true
    }
}

// ============================================================================
// Interval trigger
// ============================================================================

/// Run a cycle every `interval` until `shutdown` flips to true.
///
/// The first cycle starts one interval after spawning. A failing cycle is
/// logged and the trigger keeps going.
pub fn spawn_interval_trigger(
    runner: Arc<CycleRunner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::info!(interval_secs = interval.as_secs(), "Interval trigger started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = runner.run_cycle().await {
                        tracing::error!(
                            error = %e,
                            category = e.category().as_str(),
                            "Scheduled fetch cycle failed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Interval trigger stopped");
    })
}

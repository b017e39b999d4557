//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use charger_status::config::Config;
use charger_status::crawler::{
    AdapterRegistry, FetchOrchestrator, JsonFetcher, OrchestratorConfig, ProviderEndpoints,
};
use charger_status::models::{StationMetadata, StationSnapshot, Usage};
use charger_status::scheduler::{CycleRunner, CycleSettings};
use charger_status::storage::{MemoryRepository, SharedRepository};

/// 12:00 in UTC+8, outside the night pause
pub fn daytime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap()
}

/// 03:00 in UTC+8, inside the night pause
pub fn night() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 19, 0, 0).unwrap()
}

/// Station with the given sub-devices
pub fn station(hash_id: &str, name: &str, provider: &str, devices: &[&str]) -> StationMetadata {
    StationMetadata {
        hash_id: hash_id.to_string(),
        name: name.to_string(),
        provider: provider.to_string(),
        campus_id: 2,
        campus_name: String::new(),
        lat: 30.3,
        lon: 120.1,
        device_ids: devices.iter().map(|d| d.to_string()).collect(),
    }
}

/// `count` neptune stations with one device each (`00000001` / `dev-1`, ...)
pub fn neptune_fleet(count: usize) -> Vec<StationMetadata> {
    (0..count)
        .map(|i| {
            let hash_id = format!("{:08x}", i + 1);
            let device = format!("dev-{}", i + 1);
            station(&hash_id, &format!("Station {:02}", i + 1), "neptune", &[&device])
        })
        .collect()
}

pub fn snapshot(hash_id: &str, snapshot_time: i64, free: u32, used: u32) -> StationSnapshot {
    StationSnapshot::new(
        hash_id,
        snapshot_time,
        Usage {
            free,
            used,
            total: free + used,
            error: 0,
        },
    )
}

/// Neptune device-info body for a port-status string
pub fn neptune_body(port_status: &str) -> Value {
    json!({
        "success": true,
        "obj": { "portstatur": port_status }
    })
}

/// Config aimed at a mock server with every secret filled in
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.fetcher.night_pause = false;
    config.fetcher.request_timeout_ms = 2_000;
    config.fetcher.station_timeout_ms = 5_000;
    config.credentials.neptune_junior_openid = Some("openid".to_string());
    config.credentials.neptune_junior_unionid = Some("unionid".to_string());
    config.credentials.dlmm_token = Some("dlmm-token".to_string());
    config.credentials.opentool_token = Some("opentool-token".to_string());
    config.credentials.letfungo_token = Some("letfungo-token".to_string());
    config.credentials.wanchong_token = Some("wanchong-token".to_string());
    config.credentials.wkd_token = Some("wkd-token".to_string());
    config
}

/// Standard registry pointed at `base_url`
pub fn registry_for(base_url: &str, config: &Config) -> AdapterRegistry {
    let http = JsonFetcher::new(config.request_timeout()).unwrap();
    AdapterRegistry::standard(http, &config.credentials, &ProviderEndpoints::all(base_url))
}

pub fn orchestrator_for(base_url: &str, config: &Config) -> FetchOrchestrator {
    FetchOrchestrator::new(
        Arc::new(registry_for(base_url, config)),
        OrchestratorConfig {
            concurrency: config.resolved_concurrency(),
            station_timeout: config.station_timeout(),
        },
    )
}

/// Runner over `store` with every adapter pointed at `base_url`
pub fn runner_for(base_url: &str, config: &Config, store: SharedRepository) -> CycleRunner {
    CycleRunner::with_endpoints(config, store, &ProviderEndpoints::all(base_url)).unwrap()
}

/// Runner with no adapters at all; every station reports zeros
pub fn offline_runner(store: SharedRepository) -> Arc<CycleRunner> {
    Arc::new(CycleRunner::new(
        store,
        FetchOrchestrator::new(Arc::new(AdapterRegistry::new()), OrchestratorConfig::default()),
        CycleSettings {
            cycle_interval: Duration::from_secs(120),
            max_outbound_calls: None,
            history_enabled: true,
            night_pause: false,
        },
    ))
}

pub fn memory_store() -> Arc<MemoryRepository> {
    Arc::new(MemoryRepository::new())
}

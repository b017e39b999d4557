//! End-to-end cycles: store -> rotation -> workers -> persistence

mod common;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use charger_status::storage::{
    create_sqlite_repository, SharedRepository, SnapshotStore, StationRegistry,
};

use common::*;

const PREVIOUS_TIME: i64 = 1_000;

async fn neptune_server(port_status: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wxn/getDeviceInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(neptune_body(port_status)))
        .mount(&server)
        .await;
    server
}

/// Store holding the fleet plus a previous latest row (free=9) for each station
fn seeded_store(count: usize) -> SharedRepository {
    let store: SharedRepository = memory_store();
    let fleet = neptune_fleet(count);
    store.upsert_stations(&fleet, 1).unwrap();

    let previous: Vec<_> = fleet
        .iter()
        .map(|s| snapshot(&s.hash_id, PREVIOUS_TIME, 9, 0))
        .collect();
    store.upsert_latest(&previous).unwrap();
    store
}

#[tokio::test]
async fn test_full_cycle_persists_every_station() {
    let server = neptune_server("0011").await;
    let store = seeded_store(5);
    let runner = runner_for(&server.uri(), &test_config(), store.clone());

    let report = runner.run_cycle_at(daytime()).await.unwrap();

    assert_eq!(report.station_count, 5);
    assert_eq!(report.fetched_count, 5);
    assert_eq!(report.concurrency, 4);
    assert!(report.persisted);
    assert!(!report.stopped_by_quota);
    assert!(!report.skipped);

    let latest = store.latest(None).unwrap();
    assert_eq!(latest.len(), 5);
    for row in &latest {
        assert_eq!(row.snapshot_time, daytime().timestamp_millis());
        assert_eq!((row.free, row.used, row.total), (2, 2, 4));
    }

    let history = store.history("00000001").unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_quota_keeps_partial_results_and_leaves_others_untouched() {
    let server = neptune_server("0").await;
    let store = seeded_store(10);

    let mut config = test_config();
    config.fetcher.max_outbound_calls = Some(3);
    let runner = runner_for(&server.uri(), &config, store.clone());

    let report = runner.run_cycle_at(daytime()).await.unwrap();

    assert!(report.stopped_by_quota);
    assert_eq!(report.fetched_count, 3);
    assert!(report.persisted);

    let latest = store.latest(None).unwrap();
    assert_eq!(latest.len(), 10);

    let refreshed: Vec<_> = latest
        .iter()
        .filter(|r| r.snapshot_time == daytime().timestamp_millis())
        .collect();
    assert_eq!(refreshed.len(), 3);
    assert!(refreshed.iter().all(|r| r.free == 1 && r.total == 1));

    let untouched: Vec<_> = latest
        .iter()
        .filter(|r| r.snapshot_time == PREVIOUS_TIME)
        .collect();
    assert_eq!(untouched.len(), 7);
    assert!(untouched.iter().all(|r| r.free == 9));
}

#[tokio::test]
async fn test_night_pause_skips_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = seeded_store(3);
    let mut config = test_config();
    config.fetcher.night_pause = true;
    let runner = runner_for(&server.uri(), &config, store.clone());

    let report = runner.run_cycle_at(night()).await.unwrap();

    assert!(report.skipped);
    assert_eq!(report.fetched_count, 0);
    assert!(store
        .latest(None)
        .unwrap()
        .iter()
        .all(|r| r.snapshot_time == PREVIOUS_TIME));
}

#[tokio::test]
async fn test_history_disabled_only_touches_latest() {
    let server = neptune_server("01").await;
    let store = seeded_store(2);

    let mut config = test_config();
    config.fetcher.history_enabled = false;
    let runner = runner_for(&server.uri(), &config, store.clone());

    let report = runner.run_cycle_at(daytime()).await.unwrap();

    assert!(!report.history_enabled);
    assert!(report.persisted);
    assert!(store.history("00000001").unwrap().is_empty());
    assert!(store.history("00000002").unwrap().is_empty());
}

#[tokio::test]
async fn test_persistence_failure_is_reported_not_raised() {
    let server = neptune_server("0").await;
    let repo = memory_store();
    repo.upsert_stations(&neptune_fleet(2), 1).unwrap();
    repo.set_fail_writes(true);

    let runner = runner_for(&server.uri(), &test_config(), repo.clone());

    let report = runner.run_cycle_at(daytime()).await.unwrap();
    assert_eq!(report.fetched_count, 2);
    assert!(!report.persisted);

    // The next cycle still runs once the store recovers.
    repo.set_fail_writes(false);
    let report = runner.run_cycle_at(daytime()).await.unwrap();
    assert!(report.persisted);
    assert_eq!(repo.latest(None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_store_reports_nothing_to_do() {
    let server = MockServer::start().await;
    let runner = runner_for(&server.uri(), &test_config(), memory_store());

    let report = runner.run_cycle_at(daytime()).await.unwrap();
    assert_eq!(report.station_count, 0);
    assert_eq!(report.fetched_count, 0);
    assert!(!report.persisted);
}

#[tokio::test]
async fn test_station_load_failure_is_an_error() {
    let server = MockServer::start().await;
    let repo = memory_store();
    repo.set_fail_reads(true);
    let runner = runner_for(&server.uri(), &test_config(), repo);

    assert!(runner.run_cycle_at(daytime()).await.is_err());
}

#[tokio::test]
async fn test_sqlite_cycle_is_idempotent_per_timestamp() {
    let server = neptune_server("03").await;
    let dir = tempfile::tempdir().unwrap();
    let store = create_sqlite_repository(dir.path().join("charger.db")).unwrap();
    store.upsert_stations(&neptune_fleet(4), 1).unwrap();

    let runner = runner_for(&server.uri(), &test_config(), store.clone());
    runner.run_cycle_at(daytime()).await.unwrap();
    let first = store.latest(None).unwrap();

    runner.run_cycle_at(daytime()).await.unwrap();
    let second = store.latest(None).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
    assert_eq!((first[0].free, first[0].error, first[0].total), (1, 1, 2));
    assert_eq!(store.history("00000003").unwrap().len(), 1);
}

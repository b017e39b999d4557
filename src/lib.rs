//! charger-status - availability tracker for third-party charging stations
//!
//! Polls many unrelated charging and battery-swap platforms for per-station
//! free/used/error port counts, stores the latest (and optionally historical)
//! snapshot per station, and serves the aggregated state over HTTP.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Provider adapters, per-cycle context, and the fetch worker pool
//! - [`scheduler`] - Station rotation, the night pause, and the cycle runner
//! - [`storage`] - SQLite persistence for stations, latest, and history
//! - [`query`] - Read-path status queries and filter validation
//! - [`server`] - axum read API and `POST /run`
//! - [`metrics`] - Prometheus counters
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use charger_status::config::Config;
//! use charger_status::scheduler::CycleRunner;
//! use charger_status::storage::create_sqlite_repository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = create_sqlite_repository(&config.database.sqlite_path)?;
//!     let runner = Arc::new(CycleRunner::from_config(&config, store)?);
//!     let report = runner.run_cycle().await?;
//!     println!("fetched {} of {}", report.fetched_count, report.station_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod query;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{AdapterRegistry, CycleContext, FetchOrchestrator, ProviderAdapter};
    pub use crate::error::{ChargerErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{StationMetadata, StationSnapshot, Usage};
    pub use crate::query::{StatusFilter, StatusQueryService};
    pub use crate::scheduler::{CycleReport, CycleRunner};
    pub use crate::storage::{SharedRepository, Store};
}

// Direct re-exports for convenience
pub use models::{FormattedStationStatus, StationMetadata, StationSnapshot, Usage};

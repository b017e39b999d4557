//! Station polling against third-party platforms
//!
//! - [`fetcher`] - outbound JSON client with per-call deadline and quota signal
//! - [`context`] - per-cycle state shared by workers (call budget, provider tokens)
//! - [`providers`] - one adapter per platform, resolved by provider tag
//! - [`pipeline`] - bounded worker pool that fetches a cycle's stations

pub mod context;
pub mod fetcher;
pub mod pipeline;
pub mod providers;

pub use context::{CallBudget, CycleContext};
pub use fetcher::JsonFetcher;
pub use pipeline::{CycleOutcome, FetchOrchestrator, FetchStatsSnapshot, OrchestratorConfig};
pub use providers::{AdapterRegistry, ProviderAdapter, ProviderEndpoints, Resolved};

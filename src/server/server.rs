//! API server implementation
//!
//! Wires the query service, the cycle runner, and the optional interval
//! trigger behind one axum router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::query::StatusQueryService;
use crate::scheduler::trigger::{spawn_interval_trigger, CycleRunner};
use crate::storage::SharedRepository;

use super::api::create_router;
use super::limit::KeyedLimiter;

/// How often idle limiter keys are swept
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Read-path service
    pub query: StatusQueryService,

    /// Runs cycles for `POST /run` and the interval trigger
    pub runner: Arc<CycleRunner>,

    /// Inbound limiter for read routes
    pub limiter: Option<KeyedLimiter>,
}

impl AppState {
    pub fn new(store: SharedRepository, runner: Arc<CycleRunner>, config: &ServerConfig) -> Self {
        Self {
            query: StatusQueryService::new(store),
            runner,
            limiter: config.rate_limit_per_minute.and_then(KeyedLimiter::per_minute),
        }
    }
}

// ============================================================================
// API Server
// ============================================================================

/// HTTP front end for the status store
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ServerConfig, store: SharedRepository, runner: Arc<CycleRunner>) -> Self {
        let state = AppState::new(store, runner, &config);
        Self { config, state }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes and configured layers
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until the process is stopped
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown_signal` resolves, then stop the interval trigger
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind { addr, source: e })?;

        tracing::info!(
            addr = %addr,
            schedule_enabled = self.config.schedule_enabled,
            rate_limited = self.state.limiter.is_some(),
            "Starting API server"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let trigger = self.config.schedule_enabled.then(|| {
            let runner = Arc::clone(&self.state.runner);
            let interval = runner.settings().cycle_interval;
            spawn_interval_trigger(runner, interval, stop_rx.clone())
        });
        self.spawn_limiter_sweep(stop_rx);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await;

        let _ = stop_tx.send(true);
        if let Some(handle) = trigger {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Interval trigger ended abnormally");
            }
        }

        served.map_err(ServerError::Serve)?;
        tracing::info!("API server shutdown complete");
        Ok(())
    }

    fn spawn_limiter_sweep(&self, mut stop: watch::Receiver<bool>) {
        let Some(limiter) = self.state.limiter.clone() else {
            return;
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.retain_recent(),
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
            rate_limit_per_minute: self.config.rate_limit_per_minute,
            schedule_enabled: self.config.schedule_enabled,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
    pub rate_limit_per_minute: Option<u32>,
    pub schedule_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        let on_off = |flag: bool| if flag { "enabled" } else { "disabled" };
        let rate = self
            .rate_limit_per_minute
            .map_or_else(|| "disabled".to_string(), |n| format!("{n}/min per client and path"));

        format!(
            "Charger Status API\n\
             {:-<40}\n\
             Bind Address: {}\n\
             CORS: {}\n\
             Request Logging: {}\n\
             Rate Limit: {}\n\
             Interval Trigger: {}",
            "",
            self.bind_address,
            on_off(self.cors_enabled),
            on_off(self.request_logging_enabled),
            rate,
            on_off(self.schedule_enabled),
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Server loop error
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::pipeline::{FetchOrchestrator, OrchestratorConfig};
    use crate::crawler::providers::AdapterRegistry;
    use crate::scheduler::trigger::CycleSettings;
    use crate::storage::create_memory_repository;

    fn server(config: ServerConfig) -> ApiServer {
        let store = create_memory_repository();
        let runner = Arc::new(CycleRunner::new(
            store.clone(),
            FetchOrchestrator::new(Arc::new(AdapterRegistry::new()), OrchestratorConfig::default()),
            CycleSettings {
                cycle_interval: Duration::from_secs(120),
                max_outbound_calls: None,
                history_enabled: true,
                night_pause: false,
            },
        ));
        ApiServer::new(config, store, runner)
    }

    #[test]
    fn test_server_info() {
        let info = server(ServerConfig::default()).info();
        assert!(info.cors_enabled);
        assert!(info.rate_limit_per_minute.is_none());
        assert!(info.display().contains("Rate Limit: disabled"));
    }

    #[test]
    fn test_limiter_follows_config() {
        let config = ServerConfig {
            rate_limit_per_minute: Some(30),
            ..ServerConfig::default()
        };
        assert!(server(config).state().limiter.is_some());

        let config = ServerConfig {
            rate_limit_per_minute: Some(0),
            ..ServerConfig::default()
        };
        assert!(server(config).state().limiter.is_none());
    }
}

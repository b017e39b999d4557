//! REST API handlers for the read API
//!
//! Routes are mounted at the root. `/status*`, `/providers` and `/stations`
//! sit behind the optional keyed rate limiter.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::ChargerErrorTrait;
use crate::metrics;
use crate::query::{QueryError, StatusFilter};
use crate::scheduler::trigger::CycleReport;

use super::limit::rate_limit;
use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Error body shared by every route
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Informational root
#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub message: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

/// Result of an on-demand cycle
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CycleReport>,
}

/// `/status` query string
#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    pub provider: Option<String>,
    pub hash_id: Option<String>,
    pub devid: Option<String>,
}

impl StatusParams {
    fn filter(&self) -> StatusFilter {
        StatusFilter::new(
            self.provider.as_deref(),
            self.hash_id.as_deref(),
            self.devid.as_deref(),
        )
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let detail = match &self {
            QueryError::Storage(e) => {
                tracing::error!(error = %e, category = self.category().as_str(), "Status query failed");
                "Failed to query station status".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(detail))).into_response()
    }
}

const ENDPOINTS: &[&str] = &[
    "/status",
    "/status-summary",
    "/providers",
    "/stations",
    "/run",
    "/metrics",
];

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let read_routes = Router::new()
        .route("/status", get(get_status))
        .route("/status-summary", get(status_summary))
        .route("/providers", get(list_providers))
        .route("/stations", get(list_stations))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/", get(status_summary))
        .route("/run", post(run_cycle))
        .route("/metrics", get(metrics_text))
        .merge(read_routes)
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Count every request by matched route and status
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Handlers
// ============================================================================

async fn status_summary() -> impl IntoResponse {
    Json(SummaryResponse {
        message: "Charging station status API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: ENDPOINTS.iter().map(|e| e.to_string()).collect(),
    })
}

async fn get_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Response, QueryError> {
    let response = state.query.status(&params.filter())?;
    Ok(Json(response).into_response())
}

async fn list_providers(State(state): State<AppState>) -> Response {
    match state.query.providers() {
        Ok(providers) => Json(providers).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list providers");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to fetch providers")),
            )
                .into_response()
        }
    }
}

async fn list_stations(State(state): State<AppState>) -> Result<Response, QueryError> {
    let response = state.query.stations()?;
    Ok(Json(response).into_response())
}

/// Run one cycle synchronously
async fn run_cycle(State(state): State<AppState>) -> Response {
    match state.runner.run_cycle().await {
        Ok(report) => {
            let message = if report.skipped {
                "Skipped: night pause window"
            } else if report.stopped_by_quota {
                "Fetch cycle stopped early by outbound quota"
            } else {
                "Fetch cycle complete"
            };

            Json(RunResponse {
                success: true,
                message: message.to_string(),
                report: Some(report),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                category = e.category().as_str(),
                "On-demand fetch cycle failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RunResponse {
                    success: false,
                    message: format!("Fetch cycle failed: {e}"),
                    report: None,
                }),
            )
                .into_response()
        }
    }
}

/// Prometheus text exposition
async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let body = serde_json::to_value(ErrorResponse::new("boom")).unwrap();
        assert_eq!(body, serde_json::json!({ "detail": "boom" }));
    }

    #[test]
    fn test_query_error_status_mapping() {
        let response = QueryError::DevidWithoutProvider.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = QueryError::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = QueryError::InvalidFilter {
            field: "hash_id",
            message: "expected 8 hex characters",
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_params_treat_empty_as_absent() {
        let params = StatusParams {
            provider: Some(String::new()),
            hash_id: None,
            devid: None,
        };
        assert!(params.filter().is_empty());
    }

    #[test]
    fn test_run_response_omits_missing_report() {
        let body = serde_json::to_value(RunResponse {
            success: false,
            message: "failed".to_string(),
            report: None,
        })
        .unwrap();
        assert!(body.get("report").is_none());
    }
}

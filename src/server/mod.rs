//! HTTP read API
//!
//! - [`api`] - routes, handlers, and response bodies
//! - [`limit`] - keyed inbound rate limiting for read routes
//! - [`server`] - application state, layers, and the serve loop

pub mod api;
pub mod limit;
pub mod server;

pub use api::{create_router, ErrorResponse, RunResponse, SummaryResponse};
pub use limit::KeyedLimiter;
pub use server::{ApiServer, AppState, ServerError, ServerInfo};

//! Keyed inbound rate limiting
//!
//! Callers are keyed by `<client-ip>:<path>`, the client ip taken from
//! `cf-connecting-ip` or the first `x-forwarded-for` entry.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use super::api::ErrorResponse;
use super::server::AppState;

/// Seconds a limited caller is told to wait
pub const RETRY_AFTER_SECS: u64 = 60;

/// Per-key limiter shared by every read route
#[derive(Clone)]
pub struct KeyedLimiter {
    inner: Arc<DefaultKeyedRateLimiter<String>>,
}

impl KeyedLimiter {
    /// `None` when `per_minute` is zero
    pub fn per_minute(per_minute: u32) -> Option<Self> {
        let rate = NonZeroU32::new(per_minute)?;
        Some(Self {
            inner: Arc::new(RateLimiter::keyed(Quota::per_minute(rate))),
        })
    }

    /// Take one cell for `key`; false when the key is over its quota
    pub fn check(&self, key: &str) -> bool {
        self.inner.check_key(&key.to_string()).is_ok()
    }

    /// Drop state for keys that have fully recovered
    pub fn retain_recent(&self) {
        self.inner.retain_recent();
    }
}

/// Client identifier supplied by the fronting proxy
pub fn client_identifier(headers: &HeaderMap) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    from_header("cf-connecting-ip")
        .or_else(|| from_header("x-forwarded-for"))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Limiter key for a request
pub fn limit_key(headers: &HeaderMap, path: &str) -> String {
    format!("{}:{}", client_identifier(headers), path)
}

pub(crate) async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(request).await;
    };

    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let key = limit_key(request.headers(), request.uri().path());
    if limiter.check(&key) {
        return next.run(request).await;
    }

    tracing::warn!(key = %key, "Rate limit exceeded");

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse::new("Too many requests, please slow down")),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_identifier_precedence() {
        let h = headers(&[
            ("cf-connecting-ip", "1.1.1.1"),
            ("x-forwarded-for", "2.2.2.2"),
        ]);
        assert_eq!(client_identifier(&h), "1.1.1.1");

        let h = headers(&[("x-forwarded-for", "3.3.3.3, 10.0.0.1")]);
        assert_eq!(client_identifier(&h), "3.3.3.3");

        assert_eq!(client_identifier(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_limit_key_includes_path() {
        let h = headers(&[("cf-connecting-ip", "1.1.1.1")]);
        assert_eq!(limit_key(&h, "/status"), "1.1.1.1:/status");
    }

    #[test]
    fn test_keyed_limiter_isolates_keys() {
        let limiter = KeyedLimiter::per_minute(2).unwrap();
        assert!(limiter.check("a:/status"));
        assert!(limiter.check("a:/status"));
        assert!(!limiter.check("a:/status"));

        assert!(limiter.check("b:/status"));
        assert!(limiter.check("a:/providers"));
    }

    #[test]
    fn test_zero_rate_disables_limiter() {
        assert!(KeyedLimiter::per_minute(0).is_none());
    }
}

//! Outbound JSON client shared by every provider adapter
//!
//! Every call made through [`JsonFetcher`]:
//! - claims one unit of the cycle's outbound call budget first
//! - runs under a fixed per-call deadline (cancelled on expiry)
//! - maps transport failures mentioning the platform quota to
//!   [`FetchError::QuotaExhausted`]
//! - requires a 2xx status and a JSON body

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use super::context::CycleContext;
use crate::utils::error::FetchError;

/// Default per-call deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(8_000);

/// JSON HTTP client with per-call deadline and quota accounting
#[derive(Debug, Clone)]
pub struct JsonFetcher {
    /// HTTP client with compression enabled
    client: Client,

    /// Deadline for one outbound call, including body download
    request_timeout: Duration,
}

impl JsonFetcher {
    /// Create a fetcher with the given per-call deadline
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(request_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().gzip(true).build()?;
        Ok(Self::with_client(client, request_timeout))
    }

    /// Wrap an existing client
    pub fn with_client(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Start a GET request
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Start a POST request
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Send a prepared request and decode the JSON body
    ///
    /// # Errors
    ///
    /// - `FetchError::QuotaExhausted` when the cycle budget is spent or the
    ///   transport reports the platform quota
    /// - `FetchError::Timeout` when the deadline expires
    /// - `FetchError::Status` on a non-2xx response
    /// - `FetchError::Decode` when the body is not JSON
    pub async fn send_json(
        &self,
        ctx: &CycleContext,
        request: RequestBuilder,
    ) -> Result<Value, FetchError> {
        ctx.budget().acquire()?;

        let call = async {
            let response = request.send().await.map_err(FetchError::from_transport)?;

            let status = response.status();
            if !status.is_success() {
                tracing::debug!(status = status.as_u16(), url = %response.url(), "Non-2xx upstream response");
                return Err(FetchError::Status(status.as_u16()));
            }

            let body = response.bytes().await.map_err(FetchError::from_transport)?;
            serde_json::from_slice::<Value>(&body).map_err(|e| FetchError::Decode(e.to_string()))
        };

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

// ============================================================================
// Lenient field access
// ============================================================================

/// Read a JSON value as a number the way loosely-typed upstreams expect:
/// numbers as-is, numeric strings parsed, booleans as 0/1, null as 0,
/// everything else 0.
pub fn lenient_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(0.0)
            }
        }
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    };

    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

/// Lenient non-negative count
pub fn lenient_count(value: Option<&Value>) -> u32 {
    let n = lenient_number(value);
    if n <= 0.0 {
        0
    } else {
        n.min(f64::from(u32::MAX)) as u32
    }
}

/// Lenient status compared by numeric equality; `0.5` is not `0`
pub fn code_is(value: Option<&Value>, expected: i64) -> bool {
    lenient_number(value) == expected as f64
}

/// Top-level `code` field equal to `expected`; numeric strings do not count
pub fn response_code_is(payload: &Value, expected: i64) -> bool {
    payload.get("code").and_then(Value::as_f64) == Some(expected as f64)
}

/// Array at `pointer`, empty when absent or not an array
pub fn array_at<'a>(payload: &'a Value, pointer: &str) -> &'a [Value] {
    payload
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_lenient_number() {
        assert_eq!(lenient_number(Some(&json!(3))), 3.0);
        assert_eq!(lenient_number(Some(&json!(" 7 "))), 7.0);
        assert_eq!(lenient_number(Some(&json!("abc"))), 0.0);
        assert_eq!(lenient_number(Some(&json!(""))), 0.0);
        assert_eq!(lenient_number(Some(&json!(true))), 1.0);
        assert_eq!(lenient_number(Some(&Value::Null)), 0.0);
        assert_eq!(lenient_number(None), 0.0);
        assert_eq!(lenient_number(Some(&json!({"a": 1}))), 0.0);
    }

    #[test]
    fn test_lenient_count_clamps_negative() {
        assert_eq!(lenient_count(Some(&json!(-4))), 0);
        assert_eq!(lenient_count(Some(&json!(2.0))), 2);
    }

    #[test]
    fn test_code_is_compares_exact_values() {
        assert!(code_is(Some(&json!(0)), 0));
        assert!(code_is(Some(&json!("2")), 2));
        assert!(code_is(Some(&json!(2.0)), 2));
        assert!(!code_is(Some(&json!(0.5)), 0));
        assert!(!code_is(Some(&json!(1.9)), 1));
        assert!(code_is(None, 0));
    }

    #[test]
    fn test_response_code_is() {
        assert!(response_code_is(&json!({"code": 200}), 200));
        assert!(response_code_is(&json!({"code": 200.0}), 200));
        assert!(!response_code_is(&json!({"code": "200"}), 200));
        assert!(!response_code_is(&json!({"code": 200.5}), 200));
        assert!(!response_code_is(&json!({"msg": "x"}), 200));
    }

    #[test]
    fn test_array_at() {
        let payload = json!({"data": {"port": [1, 2]}, "x": 1});
        assert_eq!(array_at(&payload, "/data/port").len(), 2);
        assert!(array_at(&payload, "/data/missing").is_empty());
        assert!(array_at(&payload, "/x").is_empty());
    }

    #[tokio::test]
    async fn test_send_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let ctx = CycleContext::new(0, None);
        let body = fetcher
            .send_json(&ctx, fetcher.get(&format!("{}/ok", server.uri())))
            .await
            .unwrap();

        assert_eq!(body["code"], 200);
        assert_eq!(ctx.budget().used(), 1);
    }

    #[tokio::test]
    async fn test_send_json_status_and_decode_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let ctx = CycleContext::new(0, None);

        let down = fetcher
            .send_json(&ctx, fetcher.get(&format!("{}/down", server.uri())))
            .await;
        assert!(matches!(down, Err(FetchError::Status(503))));

        let html = fetcher
            .send_json(&ctx, fetcher.get(&format!("{}/html", server.uri())))
            .await;
        assert!(matches!(html, Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_send_json_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(Duration::from_millis(50)).unwrap();
        let ctx = CycleContext::new(0, None);
        let result = fetcher.send_json(&ctx, fetcher.get(&server.uri())).await;

        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_send_json_budget_exhausted_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let ctx = CycleContext::new(0, Some(1));

        assert!(fetcher.send_json(&ctx, fetcher.get(&server.uri())).await.is_ok());
        let second = fetcher.send_json(&ctx, fetcher.get(&server.uri())).await;
        assert!(matches!(second, Err(FetchError::QuotaExhausted)));
    }
}

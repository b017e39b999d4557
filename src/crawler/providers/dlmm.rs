//! Dianlvmama charging stations

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{array_at, code_is, response_code_is, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const TAG: &str = "dlmm";
const STATION_PATH: &str = "/dlServer/dlmm/getStation";

pub struct DlmmAdapter {
    http: JsonFetcher,
    url: String,
    token: Option<String>,
}

impl DlmmAdapter {
    pub fn new(http: JsonFetcher, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            url: endpoint(base_url, STATION_PATH),
            token,
        }
    }
}

#[async_trait]
impl ProviderAdapter for DlmmAdapter {
    fn tag(&self) -> &str {
        TAG
    }

    async fn session(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(ctx.credential(TAG, self.token.as_deref(), "DLMM_TOKEN").await)
    }

    async fn fetch_device(
        &self,
        device_id: &str,
        session: &str,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        let request = self
            .http
            .post(&self.url)
            .header("authorization", session)
            .header("tenant-id", "1")
            .json(&json!({ "stationNo": device_id }));

        let payload = self.http.send_json(ctx, request).await?;
        parse_station(&payload)
    }
}

/// Per socket status: 0 free, 1 used, anything else error
pub fn parse_station(payload: &Value) -> Result<Usage, FetchError> {
    if !response_code_is(payload, 200) {
        return Err(FetchError::Rejected(format!(
            "code {}",
            payload.get("code").unwrap_or(&Value::Null)
        )));
    }

    let mut usage = Usage::zero();
    for socket in array_at(payload, "/data/socketArray") {
        usage.total += 1;
        let status = socket.get("status");
        if code_is(status, 0) {
            usage.free += 1;
        } else if code_is(status, 1) {
            usage.used += 1;
        } else {
            usage.error += 1;
        }
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_statuses() {
        let payload = json!({"code": 200, "data": {"socketArray": [
            {"status": 0}, {"status": 0}, {"status": 1}, {"status": 4}, {}
        ]}});
        assert_eq!(
            parse_station(&payload).unwrap(),
            Usage { free: 3, used: 1, total: 5, error: 1 }
        );
    }

    #[test]
    fn test_non_200_code_rejected() {
        assert!(parse_station(&json!({"code": 401})).is_err());
        assert!(parse_station(&json!({"data": {}})).is_err());
        assert!(parse_station(&json!({"code": "200"})).is_err());
    }

    #[test]
    fn test_fractional_status_is_an_error() {
        let payload = json!({"code": 200.0, "data": {"socketArray": [
            {"status": 0.5}, {"status": 1.0}, {"status": "0"}
        ]}});
        assert_eq!(
            parse_station(&payload).unwrap(),
            Usage { free: 1, used: 1, total: 3, error: 1 }
        );
    }
}

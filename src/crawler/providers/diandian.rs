//! Diandian (点点畅行) charging posts; no credential needed

use async_trait::async_trait;
use serde_json::Value;

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{array_at, code_is, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const SCAN_PATH: &str = "/api-device/api/v1/scan/Index";

pub struct DiandianAdapter {
    http: JsonFetcher,
    url: String,
}

impl DiandianAdapter {
    pub fn new(http: JsonFetcher, base_url: &str) -> Self {
        Self {
            http,
            url: endpoint(base_url, SCAN_PATH),
        }
    }
}

#[async_trait]
impl ProviderAdapter for DiandianAdapter {
    fn tag(&self) -> &str {
        "点点畅行"
    }

    async fn fetch_device(
        &self,
        device_id: &str,
        _session: &str,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        let request = self
            .http
            .post(&self.url)
            .form(&[("DeviceNumber", device_id)]);

        let payload = self.http.send_json(ctx, request).await?;
        Ok(parse_ways(&payload))
    }
}

/// Per way state: 2 free, 1 used, anything else error
pub fn parse_ways(payload: &Value) -> Usage {
    let mut usage = Usage::zero();
    for way in array_at(payload, "/data/DeviceWays") {
        usage.total += 1;
        let status = way.get("State");
        if code_is(status, 2) {
            usage.free += 1;
        } else if code_is(status, 1) {
            usage.used += 1;
        } else {
            usage.error += 1;
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_way_states() {
        let payload = json!({"data": {"DeviceWays": [
            {"State": 2}, {"State": "2"}, {"State": 1}, {"State": 0}, {"State": null}
        ]}});
        assert_eq!(parse_ways(&payload), Usage { free: 2, used: 1, total: 5, error: 2 });
    }
}

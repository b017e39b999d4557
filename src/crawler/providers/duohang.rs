//! Duohang (多航科技) charging posts, status reported as text labels

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{array_at, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const TAG: &str = "多航科技";
const SCAN_PATH: &str = "/api/device.device/scan";
const SERIAL_PREFIX: &str = "GD1B";

const STATUS_FREE: &str = "空闲";
const STATUS_USED: &str = "使用中";

pub struct DuohangAdapter {
    http: JsonFetcher,
    url: String,
    token: Option<String>,
}

impl DuohangAdapter {
    pub fn new(http: JsonFetcher, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            url: endpoint(base_url, SCAN_PATH),
            token,
        }
    }
}

#[async_trait]
impl ProviderAdapter for DuohangAdapter {
    fn tag(&self) -> &str {
        TAG
    }

    async fn session(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(ctx
            .credential(TAG, self.token.as_deref(), "ELSE_PROVIDER_OPENTOOL_TOKEN")
            .await)
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
            .header("token", session)
            .json(&scan_body(device_id));

        let payload = self.http.send_json(ctx, request).await?;
        Ok(parse_port_list(&payload))
    }
}

fn scan_body(device_id: &str) -> Value {
    let serial = format!("{SERIAL_PREFIX}{device_id}");
    json!({
        "sn": serial,
        "_sn": serial,
        "is_check": 0,
        "new_rule": 1,
    })
}

/// `空闲` free, `使用中` used, any other label error
pub fn parse_port_list(payload: &Value) -> Usage {
    let mut usage = Usage::zero();
    for port in array_at(payload, "/data/port_list") {
        usage.total += 1;
        match port.get("status_text").and_then(Value::as_str) {
            Some(STATUS_FREE) => usage.free += 1,
            Some(STATUS_USED) => usage.used += 1,
            _ => usage.error += 1,
        }
    }
    usage
}

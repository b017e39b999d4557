//! Wanchong (万充科技) charging posts

use async_trait::async_trait;
use serde_json::Value;

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{array_at, code_is, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const TAG: &str = "万充科技";
const QUERY_PATH: &str = "/query";
const COMPANY_ID: &str = "29";

pub struct WanchongAdapter {
    http: JsonFetcher,
    url: String,
    token: Option<String>,
}

impl WanchongAdapter {
    pub fn new(http: JsonFetcher, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            url: endpoint(base_url, QUERY_PATH),
            token,
        }
    }
}

#[async_trait]
impl ProviderAdapter for WanchongAdapter {
    fn tag(&self) -> &str {
        TAG
    }

    async fn session(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(ctx
            .credential(TAG, self.token.as_deref(), "ELSE_PROVIDER_WANCHONG_TOKEN")
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
            .get(&self.url)
            .query(&[("company_id", COMPANY_ID), ("device_num", device_id)])
            .header("authorization", session);

        let payload = self.http.send_json(ctx, request).await?;
        Ok(parse_ports(&payload))
    }
}

/// Per port state: 0 free, 2 used, anything else error
pub fn parse_ports(payload: &Value) -> Usage {
    let mut usage = Usage::zero();
    for port in array_at(payload, "/data/port") {
        usage.total += 1;
        let status = port.get("state");
        if code_is(status, 0) {
            usage.free += 1;
        } else if code_is(status, 2) {
            usage.used += 1;
        } else {
            usage.error += 1;
        }
    }
    usage
}

//! Dudu (嘟嘟换电) battery-swap sites
//!
//! `total` is the upstream slot count and is not reconciled with the other
//! three buckets.

use async_trait::async_trait;
use serde_json::Value;

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{array_at, lenient_count, response_code_is, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const SITE_PATH: &str = "/sharing-citybike-consumer/site/v2/map/info";

pub struct DuduAdapter {
    http: JsonFetcher,
    url: String,
}

impl DuduAdapter {
    pub fn new(http: JsonFetcher, base_url: &str) -> Self {
        Self {
            http,
            url: endpoint(base_url, SITE_PATH),
        }
    }
}

#[async_trait]
impl ProviderAdapter for DuduAdapter {
    fn tag(&self) -> &str {
        "嘟嘟换电"
    }

    async fn fetch_device(
        &self,
        device_id: &str,
        _session: &str,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        let request = self
            .http
            .get(&self.url)
            .query(&[("id", device_id)])
            .header("oem_code", "citybike");

        let payload = self.http.send_json(ctx, request).await?;
        parse_site_info(&payload)
    }
}

pub fn parse_site_info(payload: &Value) -> Result<Usage, FetchError> {
    if !response_code_is(payload, 200) {
        return Err(FetchError::Rejected(format!(
            "code {}",
            payload.get("code").unwrap_or(&Value::Null)
        )));
    }

    let mut usage = Usage {
        free: lenient_count(payload.pointer("/data/storeTake")),
        ..Usage::zero()
    };

    for exchange in array_at(payload, "/data/cbExchangeVOList") {
        let upload = exchange.get("cbExchangeUploadVO");
        let field = |name: &str| lenient_count(upload.and_then(|u| u.get(name)));

        usage.used = usage.used.saturating_add(field("storeNull"));
        usage.error = usage
            .error
            .saturating_add(field("storeLowPowerBatteryCharge"))
            .saturating_add(field("storeSoftLock"));
        usage.total = usage.total.saturating_add(field("storeCount"));
    }

    Ok(usage)
}

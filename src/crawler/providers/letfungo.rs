//! Letfungo (电动车充电网) charging cabinets
//!
//! The site detail only reports free and occupied chargers, so total is
//! their sum and error is always zero.

use async_trait::async_trait;
use serde_json::Value;

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{lenient_count, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const TAG: &str = "电动车充电网";
const SITE_PATH: &str = "/api/cabinet/getSiteDetail2";

pub struct LetfungoAdapter {
    http: JsonFetcher,
    url: String,
    token: Option<String>,
}

impl LetfungoAdapter {
    pub fn new(http: JsonFetcher, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            url: endpoint(base_url, SITE_PATH),
            token,
        }
    }
}

#[async_trait]
impl ProviderAdapter for LetfungoAdapter {
    fn tag(&self) -> &str {
        TAG
    }

    async fn session(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(ctx
            .credential(TAG, self.token.as_deref(), "ELSE_PROVIDER_LETFUNGO_TOKEN")
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
            .query(&[("siteId", device_id), ("token", session)]);

        let payload = self.http.send_json(ctx, request).await?;
        Ok(parse_site_detail(&payload))
    }
}

/// `charger_true` free, `charger_false` used
pub fn parse_site_detail(payload: &Value) -> Usage {
    let free = lenient_count(payload.pointer("/data/charger_true"));
    let used = lenient_count(payload.pointer("/data/charger_false"));

    Usage {
        free,
        used,
        total: free.saturating_add(used),
        error: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_site_detail() {
        let payload = json!({"data": {"charger_true": 6, "charger_false": "4"}});
        assert_eq!(parse_site_detail(&payload), Usage { free: 6, used: 4, total: 10, error: 0 });
    }

    #[test]
    fn test_missing_fields_are_zero() {
        assert_eq!(parse_site_detail(&json!({})), Usage::zero());
    }
}

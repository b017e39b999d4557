//! Neptune Junior charging areas
//!
//! Requires a session token from a WeChat handshake, acquired once per cycle
//! and shared by every station of this provider.

use async_trait::async_trait;
use serde_json::Value;

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{lenient_count, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const TAG: &str = "neptune_junior";
const AUTH_PATH: &str = "/api/auth/wx/mp";
const AREA_PATH: &str = "/api/charging/pile/listChargingPileDistByArea";
const TOKEN_HEADER: &str = "REQ-NPD-TOKEN";

pub struct NeptuneJuniorAdapter {
    http: JsonFetcher,
    auth_url: String,
    area_url: String,
    openid: Option<String>,
    unionid: Option<String>,
}

impl NeptuneJuniorAdapter {
    pub fn new(
        http: JsonFetcher,
        base_url: &str,
        openid: Option<String>,
        unionid: Option<String>,
    ) -> Self {
        Self {
            http,
            auth_url: endpoint(base_url, AUTH_PATH),
            area_url: endpoint(base_url, AREA_PATH),
            openid,
            unionid,
        }
    }

    async fn handshake(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        let (Some(openid), Some(unionid)) = (self.openid.as_deref(), self.unionid.as_deref())
        else {
            tracing::warn!("Missing NEPTUNE_JUNIOR_OPENID/NEPTUNE_JUNIOR_UNIONID secret values");
            return Ok(None);
        };

        let request = self
            .http
            .get(&self.auth_url)
            .query(&[("openid", openid), ("unionid", unionid)]);
        let payload = self.http.send_json(ctx, request).await?;

        let token = payload
            .pointer("/data/token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        if token.is_none() {
            tracing::warn!("Failed to obtain Neptune Junior token");
        }
        Ok(token)
    }
}

#[async_trait]
impl ProviderAdapter for NeptuneJuniorAdapter {
    fn tag(&self) -> &str {
        TAG
    }

    async fn session(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        ctx.token(TAG, || self.handshake(ctx)).await
    }

    async fn fetch_device(
        &self,
        device_id: &str,
        session: &str,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        let request = self
            .http
            .get(&self.area_url)
            .query(&[("chargingAreaId", device_id)])
            .header(TOKEN_HEADER, session);

        let payload = self.http.send_json(ctx, request).await?;
        parse_area_distribution(&payload)
    }
}

/// Upstream totals; used is whatever remains after free, trouble, booking
/// and upgrade, floored at zero
pub fn parse_area_distribution(payload: &Value) -> Result<Usage, FetchError> {
    let Some(data) = payload.get("data").filter(|d| d.is_object()) else {
        return Err(FetchError::Rejected("missing area data".to_string()));
    };

    let total = lenient_count(data.get("totalPileNumber"));
    let free = lenient_count(data.get("totalFreeNumber"));
    let error = lenient_count(data.get("totalTroubleNumber"));
    let booking = lenient_count(data.get("totalBookingNumber"));
    let upgrade = lenient_count(data.get("totalUpgradeNumber"));

    let used = i64::from(total) - i64::from(free) - i64::from(error) - i64::from(booking)
        - i64::from(upgrade);

    Ok(Usage {
        free,
        used: used.max(0) as u32,
        total,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_used_is_remainder() {
        let payload = json!({"data": {
            "totalPileNumber": 20,
            "totalFreeNumber": 8,
            "totalTroubleNumber": 2,
            "totalBookingNumber": 1,
            "totalUpgradeNumber": "1"
        }});
        assert_eq!(
            parse_area_distribution(&payload).unwrap(),
            Usage { free: 8, used: 8, total: 20, error: 2 }
        );
    }

    #[test]
    fn test_used_never_negative() {
        let payload = json!({"data": {"totalPileNumber": 2, "totalFreeNumber": 5}});
        assert_eq!(
            parse_area_distribution(&payload).unwrap(),
            Usage { free: 5, used: 0, total: 2, error: 0 }
        );
    }

    #[test]
    fn test_missing_data() {
        assert!(parse_area_distribution(&json!({"code": 401})).is_err());
    }
}

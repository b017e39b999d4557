//! WKD (威可迪换电) battery-swap cabinets
//!
//! Counts battery slots of the first cabinet in the answer: an offline slot
//! is an error, a slot not flagged for exchange is in use.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::{array_at, JsonFetcher};
use crate::models::Usage;
use crate::utils::error::FetchError;

const TAG: &str = "威可迪换电";
const DOOR_PATH: &str = "/ce-battery-account/app/cabinetDevice/getCabinetDeviceDoorById";

pub struct WkdAdapter {
    http: JsonFetcher,
    url: String,
    token: Option<String>,
}

impl WkdAdapter {
    pub fn new(http: JsonFetcher, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            url: endpoint(base_url, DOOR_PATH),
            token,
        }
    }
}

#[async_trait]
impl ProviderAdapter for WkdAdapter {
    fn tag(&self) -> &str {
        TAG
    }

    async fn session(&self, ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(ctx
            .credential(TAG, self.token.as_deref(), "ELSE_PROVIDER_WKD_TOKEN")
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
            .header("header-secretkey", session)
            .json(&json!({ "id": device_id }));

        let payload = self.http.send_json(ctx, request).await?;
        Ok(parse_cabinet(&payload))
    }
}

pub fn parse_cabinet(payload: &Value) -> Usage {
    let mut usage = Usage::zero();
    for battery in array_at(payload, "/data/cabinetDeviceList/0/detailBatteryList") {
        usage.total += 1;
        let online = battery.get("onlineStatus").filter(|v| !v.is_null());
        let exchangeable = battery.get("changeFlag").and_then(Value::as_str) == Some("Y");

        if online.is_none() {
            usage.error += 1;
        } else if !exchangeable {
            usage.used += 1;
        } else {
            usage.free += 1;
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_slots() {
        let payload = json!({"data": {"cabinetDeviceList": [
            {"detailBatteryList": [
                {"onlineStatus": 1, "changeFlag": "Y"},
                {"onlineStatus": 0, "changeFlag": "Y"},
                {"onlineStatus": 1, "changeFlag": "N"},
                {"onlineStatus": 1},
                {"onlineStatus": null, "changeFlag": "Y"},
                {"changeFlag": "Y"}
            ]},
            {"detailBatteryList": [{"onlineStatus": 1, "changeFlag": "Y"}]}
        ]}});
        assert_eq!(parse_cabinet(&payload), Usage { free: 2, used: 2, total: 6, error: 2 });
    }

    #[test]
    fn test_no_cabinet_is_zero() {
        assert_eq!(parse_cabinet(&json!({"data": {"cabinetDeviceList": []}})), Usage::zero());
    }
}

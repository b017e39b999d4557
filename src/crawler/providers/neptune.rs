//! Neptune charging posts
//!
//! One form POST per device address; the answer carries a port-status string
//! with one character per port.

use async_trait::async_trait;
use serde_json::Value;

use super::{endpoint, ProviderAdapter};
use crate::crawler::context::CycleContext;
use crate::crawler::fetcher::JsonFetcher;
use crate::models::Usage;
use crate::utils::error::FetchError;

const DEVICE_INFO_PATH: &str = "/wxn/getDeviceInfo";
const AREA_ID: &str = "6";

pub struct NeptuneAdapter {
    http: JsonFetcher,
    url: String,
}

impl NeptuneAdapter {
    pub fn new(http: JsonFetcher, base_url: &str) -> Self {
        Self {
            http,
            url: endpoint(base_url, DEVICE_INFO_PATH),
        }
    }
}

#[async_trait]
impl ProviderAdapter for NeptuneAdapter {
    fn tag(&self) -> &str {
        "neptune"
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
            .form(&[("areaId", AREA_ID), ("devaddress", device_id)]);

        let payload = self.http.send_json(ctx, request).await?;
        parse_device_info(&payload)
    }
}

/// `'0'` free, `'1'` used, `'3'` error; total is the string length
pub fn parse_device_info(payload: &Value) -> Result<Usage, FetchError> {
    let success = payload.get("success").and_then(Value::as_bool) == Some(true);
    let obj = payload.get("obj").filter(|o| !o.is_null());

    let Some(obj) = obj.filter(|_| success) else {
        let msg = payload.get("msg").and_then(Value::as_str).unwrap_or("no device info");
        return Err(FetchError::Rejected(msg.to_string()));
    };

    let port_status = match obj.get("portstatur") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let mut usage = Usage::zero();
    for c in port_status.chars() {
        match c {
            '0' => usage.free += 1,
            '1' => usage.used += 1,
            '3' => usage.error += 1,
            _ => {}
        }
        usage.total += 1;
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_port_status_string() {
        let payload = json!({"success": true, "obj": {"devaddress": 1001, "portstatur": "0013002"}});
        let usage = parse_device_info(&payload).unwrap();
        assert_eq!(usage, Usage { free: 4, used: 1, total: 7, error: 1 });
    }

    #[test]
    fn test_rejected_payloads() {
        assert!(parse_device_info(&json!({"success": false, "msg": "bad"})).is_err());
        assert!(parse_device_info(&json!({"success": true})).is_err());
        assert!(parse_device_info(&json!({"success": "true", "obj": {}})).is_err());
    }

    #[test]
    fn test_empty_port_status_is_zero() {
        let usage = parse_device_info(&json!({"success": true, "obj": {}})).unwrap();
        assert_eq!(usage, Usage::zero());
    }
}

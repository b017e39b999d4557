//! Provider adapters
//!
//! One [`ProviderAdapter`] per upstream platform, each turning the platform's
//! payloads into a [`Usage`] tuple. The [`AdapterRegistry`] maps provider tags
//! to adapters; a tag without an adapter resolves to
//! [`Resolved::Unregistered`], which yields zero counts without touching the
//! network.

pub mod diandian;
pub mod dlmm;
pub mod dudu;
pub mod duohang;
pub mod letfungo;
pub mod neptune;
pub mod neptune_junior;
pub mod noop;
pub mod wanchong;
pub mod wkd;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::CycleContext;
use super::fetcher::JsonFetcher;
use crate::config::ProviderCredentials;
use crate::models::{StationMetadata, Usage};
use crate::utils::error::FetchError;

pub use diandian::DiandianAdapter;
pub use dlmm::DlmmAdapter;
pub use dudu::DuduAdapter;
pub use duohang::DuohangAdapter;
pub use letfungo::LetfungoAdapter;
pub use neptune::NeptuneAdapter;
pub use neptune_junior::NeptuneJuniorAdapter;
pub use noop::NoopAdapter;
pub use wanchong::WanchongAdapter;
pub use wkd::WkdAdapter;

/// Deprecated or placeholder tags that are polled as a deliberate no-op
pub const PLACEHOLDER_TAGS: &[&str] = &["专用站点", "待补充", "河狸物联"];

// ============================================================================
// Adapter Trait
// ============================================================================

/// Normalizer for one upstream platform.
///
/// Implementors provide [`session`](ProviderAdapter::session) and
/// [`fetch_device`](ProviderAdapter::fetch_device); the provided
/// [`fetch_usage`](ProviderAdapter::fetch_usage) walks the station's
/// sub-devices, summing what succeeds and logging what does not.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag as stored in station metadata
    fn tag(&self) -> &str;

    /// Per-cycle session secret.
    ///
    /// `Ok(None)` means the provider cannot be polled this cycle and the
    /// station reports zero counts.
    async fn session(&self, _ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(Some(String::new()))
    }

    /// Counts for one sub-device
    async fn fetch_device(
        &self,
        device_id: &str,
        session: &str,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError>;

    /// Counts for a whole station.
    ///
    /// Only [`FetchError::QuotaExhausted`] escapes; any other sub-device
    /// failure contributes nothing and the next sub-device is tried.
    async fn fetch_usage(
        &self,
        station: &StationMetadata,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        let Some(session) = self.session(ctx).await? else {
            return Ok(Usage::zero());
        };

        let mut usage = Usage::zero();
        for device_id in &station.device_ids {
            match self.fetch_device(device_id, &session, ctx).await {
                Ok(device_usage) => usage.add(device_usage),
                Err(e) if e.is_quota_exhausted() => return Err(e),
                Err(e) => tracing::warn!(
                    station = %station.hash_id,
                    provider = %station.provider,
                    device = %device_id,
                    error = %e,
                    "Sub-device fetch failed"
                ),
            }
        }

        Ok(usage)
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Base URLs of every upstream platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub neptune: String,
    pub neptune_junior: String,
    pub dlmm: String,
    pub wanchong: String,
    pub diandian: String,
    pub letfungo: String,
    pub duohang: String,
    pub wkd: String,
    pub dudu: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            neptune: "http://www.szlzxn.cn".to_string(),
            neptune_junior: "https://gateway.hzxwwl.com".to_string(),
            dlmm: "https://dlmmplususer.dianlvmama.com".to_string(),
            wanchong: "https://websocket.wanzhuangkj.com".to_string(),
            diandian: "https://api2.hzchaoxiang.cn".to_string(),
            letfungo: "https://app.letfungo.com".to_string(),
            duohang: "https://mini.opencool.top".to_string(),
            wkd: "https://gateway.wkdsz.com".to_string(),
            dudu: "https://api.dudugxcd.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Point every platform at the same base URL (mock servers)
    pub fn all(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            neptune: base.clone(),
            neptune_junior: base.clone(),
            dlmm: base.clone(),
            wanchong: base.clone(),
            diandian: base.clone(),
            letfungo: base.clone(),
            duohang: base.clone(),
            wkd: base.clone(),
            dudu: base,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Outcome of looking up a provider tag
pub enum Resolved<'a> {
    Adapter(&'a Arc<dyn ProviderAdapter>),
    Unregistered,
}

/// Provider tag to adapter mapping
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry; every tag resolves to `Unregistered`
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every known platform plus the placeholder no-ops
    pub fn standard(
        http: JsonFetcher,
        credentials: &ProviderCredentials,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        let mut registry = Self::new();

        registry.register(NeptuneAdapter::new(http.clone(), &endpoints.neptune));
        registry.register(NeptuneJuniorAdapter::new(
            http.clone(),
            &endpoints.neptune_junior,
            credentials.neptune_junior_openid.clone(),
            credentials.neptune_junior_unionid.clone(),
        ));
        registry.register(DlmmAdapter::new(
            http.clone(),
            &endpoints.dlmm,
            credentials.dlmm_token.clone(),
        ));
        registry.register(WanchongAdapter::new(
            http.clone(),
            &endpoints.wanchong,
            credentials.wanchong_token.clone(),
        ));
        registry.register(DiandianAdapter::new(http.clone(), &endpoints.diandian));
        registry.register(LetfungoAdapter::new(
            http.clone(),
            &endpoints.letfungo,
            credentials.letfungo_token.clone(),
        ));
        registry.register(DuohangAdapter::new(
            http.clone(),
            &endpoints.duohang,
            credentials.opentool_token.clone(),
        ));
        registry.register(WkdAdapter::new(
            http.clone(),
            &endpoints.wkd,
            credentials.wkd_token.clone(),
        ));
        registry.register(DuduAdapter::new(http, &endpoints.dudu));

        for tag in PLACEHOLDER_TAGS {
            registry.register(NoopAdapter::new(*tag));
        }

        registry
    }

    /// Add or replace the adapter for its tag
    pub fn register<A: ProviderAdapter + 'static>(&mut self, adapter: A) {
        self.register_arc(Arc::new(adapter));
    }

    pub fn register_arc(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.tag().to_string(), adapter);
    }

    pub fn resolve(&self, tag: &str) -> Resolved<'_> {
        match self.adapters.get(tag) {
            Some(adapter) => Resolved::Adapter(adapter),
            None => Resolved::Unregistered,
        }
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Poll one station through its adapter
    pub async fn fetch_usage(
        &self,
        station: &StationMetadata,
        ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        match self.resolve(&station.provider) {
            Resolved::Adapter(adapter) => adapter.fetch_usage(station, ctx).await,
            Resolved::Unregistered => {
                tracing::debug!(
                    station = %station.hash_id,
                    provider = %station.provider,
                    "No adapter registered; reporting zero counts"
                );
                Ok(Usage::zero())
            }
        }
    }
}

/// Join a base URL and an absolute path
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAdapter {
        calls: AtomicU32,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ProviderAdapter for CountingAdapter {
        fn tag(&self) -> &str {
            "counting"
        }

        async fn fetch_device(
            &self,
            device_id: &str,
            _session: &str,
            _ctx: &CycleContext,
        ) -> Result<Usage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_on {
                Some(id) if id == device_id => Err(FetchError::Status(500)),
                Some("quota") => Err(FetchError::QuotaExhausted),
                _ => Ok(Usage {
                    free: 1,
                    used: 2,
                    total: 3,
                    error: 0,
                }),
            }
        }
    }

    fn station(provider: &str, devices: &[&str]) -> StationMetadata {
        StationMetadata {
            hash_id: "deadbeef".to_string(),
            name: "Test".to_string(),
            provider: provider.to_string(),
            campus_id: 1,
            campus_name: String::new(),
            lat: 0.0,
            lon: 0.0,
            device_ids: devices.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_sub_device_failure_is_skipped() {
        let adapter = CountingAdapter {
            calls: AtomicU32::new(0),
            fail_on: Some("b"),
        };
        let ctx = CycleContext::new(0, None);

        let usage = adapter
            .fetch_usage(&station("counting", &["a", "b", "c"]), &ctx)
            .await
            .unwrap();

        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(usage, Usage { free: 2, used: 4, total: 6, error: 0 });
    }

    #[tokio::test]
    async fn test_quota_aborts_station() {
        let adapter = CountingAdapter {
            calls: AtomicU32::new(0),
            fail_on: Some("quota"),
        };
        let ctx = CycleContext::new(0, None);

        let result = adapter
            .fetch_usage(&station("counting", &["a", "b"]), &ctx)
            .await;

        assert!(matches!(result, Err(FetchError::QuotaExhausted)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_zero() {
        let registry = AdapterRegistry::new();
        let ctx = CycleContext::new(0, Some(0));

        assert!(matches!(registry.resolve("unknown"), Resolved::Unregistered));
        let usage = registry
            .fetch_usage(&station("unknown", &["x"]), &ctx)
            .await
            .unwrap();

        assert_eq!(usage, Usage::zero());
        assert_eq!(ctx.budget().used(), 0);
    }

    #[test]
    fn test_standard_registry_tags() {
        let http = JsonFetcher::new(std::time::Duration::from_secs(1)).unwrap();
        let registry = AdapterRegistry::standard(
            http,
            &ProviderCredentials::default(),
            &ProviderEndpoints::default(),
        );

        let tags = registry.tags();
        for tag in ["neptune", "neptune_junior", "dlmm", "万充科技", "点点畅行", "电动车充电网", "多航科技", "威可迪换电", "嘟嘟换电"] {
            assert!(tags.contains(&tag), "missing {tag}");
        }
        for tag in PLACEHOLDER_TAGS {
            assert!(matches!(registry.resolve(tag), Resolved::Adapter(_)));
        }
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("http://a/", "/x"), "http://a/x");
        assert_eq!(endpoint("http://a", "/x"), "http://a/x");
    }
}

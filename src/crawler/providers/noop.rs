//! Placeholder providers that are never polled

use async_trait::async_trait;

use super::ProviderAdapter;
use crate::crawler::context::CycleContext;
use crate::models::{StationMetadata, Usage};
use crate::utils::error::FetchError;

/// Always reports zero counts without any network call
pub struct NoopAdapter {
    tag: String,
}

impl NoopAdapter {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

#[async_trait]
impl ProviderAdapter for NoopAdapter {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn session(&self, _ctx: &CycleContext) -> Result<Option<String>, FetchError> {
        Ok(None)
    }

    async fn fetch_device(
        &self,
        _device_id: &str,
        _session: &str,
        _ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        Ok(Usage::zero())
    }

    async fn fetch_usage(
        &self,
        _station: &StationMetadata,
        _ctx: &CycleContext,
    ) -> Result<Usage, FetchError> {
        Ok(Usage::zero())
    }
}

//! Per-cycle shared state handed to every adapter call
//!
//! A [`CycleContext`] lives for exactly one polling cycle. It carries the
//! outbound call budget and one token cell per provider, so handshakes happen
//! at most once per cycle and a fresh cycle starts from a clean slate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::utils::error::FetchError;

// ============================================================================
// Call Budget
// ============================================================================

/// Ceiling on outbound calls for one cycle
#[derive(Debug)]
pub struct CallBudget {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl CallBudget {
    /// Budget with an optional ceiling (`None` means unlimited)
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Budget without a ceiling
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Claim one outbound call.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::QuotaExhausted`] once the ceiling has been reached.
    pub fn acquire(&self) -> Result<(), FetchError> {
        let claimed = self.used.fetch_add(1, Ordering::SeqCst);
        match self.limit {
            Some(limit) if claimed >= limit => Err(FetchError::QuotaExhausted),
            _ => Ok(()),
        }
    }

    /// Calls actually granted so far
    pub fn used(&self) -> usize {
        let claimed = self.used.load(Ordering::SeqCst);
        self.limit.map_or(claimed, |limit| claimed.min(limit))
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

// ============================================================================
// Cycle Context
// ============================================================================

type TokenCell = Arc<OnceCell<Option<String>>>;

/// State shared by all workers of one cycle
#[derive(Debug)]
pub struct CycleContext {
    snapshot_time: i64,
    budget: CallBudget,
    tokens: Mutex<HashMap<String, TokenCell>>,
}

impl CycleContext {
    pub fn new(snapshot_time: i64, max_outbound_calls: Option<usize>) -> Self {
        Self {
            snapshot_time,
            budget: CallBudget::new(max_outbound_calls),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Timestamp stamped on every snapshot of this cycle (epoch ms)
    pub fn snapshot_time(&self) -> i64 {
        self.snapshot_time
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    fn token_cell(&self, provider: &str) -> TokenCell {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(tokens.entry(provider.to_string()).or_default())
    }

    /// Provider session token, acquired at most once per cycle.
    ///
    /// Concurrent callers wait on the same in-flight acquisition. A failed
    /// acquisition is cached as `None` for the rest of the cycle; only
    /// quota exhaustion is passed through uncached, since it ends the cycle.
    pub async fn token<F, Fut>(&self, provider: &str, acquire: F) -> Result<Option<String>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, FetchError>>,
    {
        let cell = self.token_cell(provider);
        let token = cell
            .get_or_try_init(|| async {
                match acquire().await {
                    Ok(token) => Ok(token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())),
                    Err(e) if e.is_quota_exhausted() => Err(e),
                    Err(e) => {
                        tracing::warn!(provider, error = %e, "Token acquisition failed");
                        Ok(None)
                    }
                }
            })
            .await?;

        Ok(token.clone())
    }

    /// Statically configured secret; a missing one is reported once per cycle
    pub async fn credential(
        &self,
        provider: &str,
        secret: Option<&str>,
        env_name: &'static str,
    ) -> Option<String> {
        let secret = secret.map(str::to_string);
        self.token(provider, || async move {
            secret
                .map(Some)
                .ok_or(FetchError::MissingCredential(env_name))
        })
        .await
        .unwrap_or(None)
    }
}

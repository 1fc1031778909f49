//! # Remote List Fetcher
//!
//! Pulls the complete suppression list from the provider page by page.
//!
//! Every provider call passes through a per-instance [`ThrottledProvider`]
//! gate, successive pages are separated by a linearly growing backoff, and
//! the whole fetch is bounded by a deadline. Hitting the deadline is not an
//! error: whatever was gathered so far is returned as an incomplete result.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::domain::{ProviderError, RemoteSuppressionEntry, SuppressionListProvider};
use crate::infrastructure::throttled_provider::ThrottledProvider;
use crate::infrastructure::config::defaults;

/// Paging and pacing knobs for a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub page_size: u32,
    /// Minimum delay between two provider calls
    pub min_call_delay: Duration,
    pub backoff_step: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            min_call_delay: Duration::from_millis(defaults::MIN_CALL_DELAY_MS),
            backoff_step: Duration::from_millis(defaults::BACKOFF_STEP_MS),
            backoff_min: Duration::from_millis(defaults::BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(defaults::BACKOFF_MAX_MS),
        }
    }
}

impl FetchPolicy {
    /// Pause after `pages_fetched` pages: `clamp(pages × step, min, max)`
    #[must_use]
    pub fn backoff_for(&self, pages_fetched: u32) -> Duration {
        let raw = self.backoff_step.saturating_mul(pages_fetched);
        raw.clamp(self.backoff_min, self.backoff_max.max(self.backoff_min))
    }
}

/// Outcome of a fetch that did not hit a provider error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub entries: Vec<RemoteSuppressionEntry>,
    /// `true` only when the end-of-list signal arrived before the deadline
    pub fully_complete: bool,
    pub pages: u32,
}

/// A page failed before the deadline; `accumulated` must not be applied
#[derive(Error, Debug)]
#[error("failed to fetch page {page}: {error}")]
pub struct FetchFailure {
    #[source]
    pub error: ProviderError,
    pub page: u32,
    pub accumulated: Vec<RemoteSuppressionEntry>,
}

pub struct RemoteListFetcher {
    provider: ThrottledProvider,
    policy: FetchPolicy,
}

impl RemoteListFetcher {
    pub fn new(provider: Arc<dyn SuppressionListProvider>, policy: FetchPolicy) -> Self {
        let provider = ThrottledProvider::new(provider, policy.min_call_delay);
        Self { provider, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Account probe through the same gate as the page calls
    pub async fn check_reachability(&self) -> Result<(), ProviderError> {
        self.provider.check_account().await
    }

    /// Fetches every page until the list ends or `deadline` passes.
    pub async fn fetch(&self, deadline: Instant) -> Result<FetchResult, FetchFailure> {
        info!("📥 Fetching remote suppression list (page size {})", self.policy.page_size);

        let mut entries: Vec<RemoteSuppressionEntry> = Vec::new();
        let mut token: Option<String> = None;
        let mut pages: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                return Ok(Self::timed_out(entries, pages));
            }

            let call = self.provider.list_page(token.as_deref(), self.policy.page_size);
            let page = match timeout_at(deadline, call).await {
                Err(_) => return Ok(Self::timed_out(entries, pages)),
                Ok(Err(error)) => {
                    warn!("❌ Failed to fetch page {}: {}", pages + 1, error);
                    return Err(FetchFailure {
                        error,
                        page: pages + 1,
                        accumulated: entries,
                    });
                }
                Ok(Ok(page)) => page,
            };

            pages += 1;
            let received = page.entries.len();
            entries.extend(page.entries);
            debug!(page = pages, received, total = entries.len(), "Fetched suppression page");

            match page.next_token.filter(|next| !next.is_empty()) {
                None => {
                    info!(
                        "✅ Fetched complete suppression list: {} entries in {} pages",
                        entries.len(),
                        pages
                    );
                    return Ok(FetchResult {
                        entries,
                        fully_complete: true,
                        pages,
                    });
                }
                Some(next) => token = Some(next),
            }

            let pause = self.policy.backoff_for(pages);
            debug!(?pause, "Waiting before next page");
            if timeout_at(deadline, sleep(pause)).await.is_err() {
                return Ok(Self::timed_out(entries, pages));
            }
        }
    }

    fn timed_out(entries: Vec<RemoteSuppressionEntry>, pages: u32) -> FetchResult {
        warn!(
            "⏰ Fetch deadline reached after {} pages ({} entries); result is incomplete",
            pages,
            entries.len()
        );
        FetchResult {
            entries,
            fully_complete: false,
            pages,
        }
    }
}

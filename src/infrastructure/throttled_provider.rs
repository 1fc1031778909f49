//! Inter-call gate for the remote provider
//!
//! Wraps any [`SuppressionListProvider`] and guarantees a minimum delay
//! between the starts of two consecutive provider calls made through the
//! same instance, whichever endpoint they hit.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use tracing::trace;

use crate::domain::{
    ProviderError, ProviderPage, RemoteSuppressionEntry, SuppressionListProvider,
    SuppressionReason,
};

/// Provider decorator enforcing a minimum inter-call delay
pub struct ThrottledProvider {
    inner: Arc<dyn SuppressionListProvider>,
    gate: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    min_delay: Duration,
}

impl ThrottledProvider {
    /// A zero delay disables the gate.
    pub fn new(inner: Arc<dyn SuppressionListProvider>, min_delay: Duration) -> Self {
        let gate = Quota::with_period(min_delay)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            inner,
            gate,
            min_delay,
        }
    }

    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        self.min_delay
    }

    async fn wait_turn(&self) {
        if let Some(gate) = &self.gate {
            gate.until_ready().await;
            trace!("Provider gate released");
        }
    }
}

#[async_trait]
impl SuppressionListProvider for ThrottledProvider {
    async fn list_page(
        &self,
        token: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage, ProviderError> {
        self.wait_turn().await;
        self.inner.list_page(token, page_size).await
    }

    async fn get_entry(
        &self,
        email: &str,
    ) -> Result<Option<RemoteSuppressionEntry>, ProviderError> {
        self.wait_turn().await;
        self.inner.get_entry(email).await
    }

    async fn put_entry(&self, email: &str, reason: SuppressionReason) -> Result<(), ProviderError> {
        self.wait_turn().await;
        self.inner.put_entry(email, reason).await
    }

    async fn delete_entry(&self, email: &str) -> Result<(), ProviderError> {
        self.wait_turn().await;
        self.inner.delete_entry(email).await
    }

    async fn check_account(&self) -> Result<(), ProviderError> {
        self.wait_turn().await;
        self.inner.check_account().await
    }
}

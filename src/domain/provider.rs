//! Remote provider interfaces
//!
//! Trait seams towards the remote suppression-list provider and the settings
//! store that says whether (and with which credentials) it may be called.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::suppression::{RemoteSuppressionEntry, SuppressionReason};

/// Errors raised while talking to the remote provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider integration is disabled")]
    Disabled,

    #[error("provider credentials are not configured")]
    MissingCredentials,

    #[error("provider throttled the request after {attempts} attempts")]
    Throttled { attempts: u32 },

    #[error("email {0} is not on the provider suppression list")]
    NotFound(String),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Throttling is the only condition worth retrying against the provider
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttled { .. }) || matches!(self, Self::Http { status: 429, .. })
    }
}

/// One page of the remote suppression list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderPage {
    pub entries: Vec<RemoteSuppressionEntry>,
    /// Opaque continuation token; `None` marks the last page
    pub next_token: Option<String>,
}

/// Remote suppression-list provider
#[async_trait]
pub trait SuppressionListProvider: Send + Sync {
    /// Fetches one page of the suppression list
    async fn list_page(
        &self,
        token: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage, ProviderError>;

    /// Looks up a single address; `Ok(None)` when it is not suppressed
    async fn get_entry(&self, email: &str) -> Result<Option<RemoteSuppressionEntry>, ProviderError>;

    async fn put_entry(&self, email: &str, reason: SuppressionReason) -> Result<(), ProviderError>;

    async fn delete_entry(&self, email: &str) -> Result<(), ProviderError>;

    /// Cheap account probe used as a reachability check
    async fn check_account(&self) -> Result<(), ProviderError>;
}

/// Runtime provider settings, re-read at the start of every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub region: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    /// Periodic sync interval in minutes; `0` means "not configured"
    pub sync_interval_minutes: u64,
}

impl ProviderConfig {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Enabled and carrying credentials
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.enabled && self.has_credentials()
    }

    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.saturating_mul(60))
    }
}

/// Errors raised by a settings source
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("malformed setting '{key}': {value}")]
    Malformed { key: String, value: String },
}

/// Source of the runtime provider configuration
#[async_trait]
pub trait ProviderSettings: Send + Sync {
    async fn provider_config(&self) -> Result<ProviderConfig, SettingsError>;
}

/// Builds a provider client from a freshly read configuration
pub trait ProviderFactory: Send + Sync {
    fn build(&self, config: &ProviderConfig)
    -> Result<Arc<dyn SuppressionListProvider>, ProviderError>;
}

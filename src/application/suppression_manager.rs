//! Administrative suppression operations
//!
//! Single and bulk add/remove, remote status checks, connection tests and
//! the "sync now" action. Provider settings are read fresh for every
//! operation and all provider calls of one operation share a throttle gate.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::sync_coordinator::{SyncCoordinator, SyncStatus};
use crate::domain::{
    ProviderConfig, ProviderError, ProviderFactory, ProviderSettings, RemoteSuppressionEntry,
    SettingsError, StoreError, SuppressionListProvider, SuppressionReason, SuppressionRecord,
    SuppressionRepository, SuppressionSource,
};
use crate::infrastructure::throttled_provider::ThrottledProvider;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("at least one email is required")]
    EmptyRequest,

    #[error("provider integration is disabled")]
    ProviderDisabled,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-email result of a bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl BulkOutcome {
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Coordinator status enriched for the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatusReport {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub provider_enabled: bool,
    /// Local provider-sourced record count; only read when enabled
    pub provider_record_count: Option<u64>,
}

pub struct SuppressionManager {
    settings: Arc<dyn ProviderSettings>,
    factory: Arc<dyn ProviderFactory>,
    repository: Arc<dyn SuppressionRepository>,
    coordinator: Arc<SyncCoordinator>,
}

impl SuppressionManager {
    pub fn new(
        settings: Arc<dyn ProviderSettings>,
        factory: Arc<dyn ProviderFactory>,
        repository: Arc<dyn SuppressionRepository>,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            settings,
            factory,
            repository,
            coordinator,
        }
    }

    fn throttled(&self, config: &ProviderConfig) -> Result<ThrottledProvider, ProviderError> {
        let provider = self.factory.build(config)?;
        Ok(ThrottledProvider::new(
            provider,
            self.coordinator.options().fetch.min_call_delay,
        ))
    }

    /// Records manual suppressions locally and, when possible, pushes them
    /// to the provider. Provider failures do not fail the local add.
    pub async fn add_manual(
        &self,
        emails: &[String],
        reason: &str,
    ) -> Result<BulkOutcome, ManagerError> {
        if emails.is_empty() {
            return Err(ManagerError::EmptyRequest);
        }

        let provider = match self.settings.provider_config().await {
            Ok(config) if config.is_usable() => match self.throttled(&config) {
                Ok(provider) => Some(provider),
                Err(e) => {
                    warn!("Provider client unavailable, adding locally only: {}", e);
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read provider settings, adding locally only: {}", e);
                None
            }
        };
        let provider_reason = SuppressionReason::from_free_text(reason);

        let mut outcome = BulkOutcome::default();
        for email in emails {
            let record = SuppressionRecord::new(
                email.clone(),
                reason,
                SuppressionSource::Manual,
                Utc::now(),
            );
            if let Err(e) = self.repository.upsert_batch(std::slice::from_ref(&record)).await {
                warn!("Failed to store manual suppression for {}: {}", email, e);
                outcome.failed.push(email.clone());
                continue;
            }

            if let Some(provider) = &provider {
                if let Err(e) = provider.put_entry(email, provider_reason).await {
                    warn!("Failed to push {} to provider: {}", email, e);
                }
            }
            outcome.succeeded.push(email.clone());
        }

        info!(
            "Manual add finished: {} succeeded, {} failed",
            outcome.success_count(),
            outcome.failed_count()
        );
        Ok(outcome)
    }

    /// Removes addresses from the provider, then from the local store.
    pub async fn remove(&self, emails: &[String]) -> Result<BulkOutcome, ManagerError> {
        if emails.is_empty() {
            return Err(ManagerError::EmptyRequest);
        }

        let config = self.settings.provider_config().await?;
        if !config.enabled {
            return Err(ManagerError::ProviderDisabled);
        }
        let provider = self.throttled(&config)?;

        let mut outcome = BulkOutcome::default();
        for email in emails {
            if let Err(e) = provider.delete_entry(email).await {
                warn!("Failed to remove {} from provider: {}", email, e);
                outcome.failed.push(email.clone());
                continue;
            }

            if let Err(e) = self.delete_local(email).await {
                warn!("Removed {} from provider but not locally: {}", email, e);
            }
            outcome.succeeded.push(email.clone());
        }

        info!(
            "Removal finished: {} succeeded, {} failed",
            outcome.success_count(),
            outcome.failed_count()
        );
        Ok(outcome)
    }

    async fn delete_local(&self, email: &str) -> Result<(), StoreError> {
        if let Some(record) = self.repository.find_by_email(email).await? {
            self.repository
                .delete_batch(record.source, &[record.email])
                .await?;
        }
        Ok(())
    }

    /// `None` when the address is not on the provider list
    pub async fn check_remote_status(
        &self,
        email: &str,
    ) -> Result<Option<RemoteSuppressionEntry>, ManagerError> {
        let config = self.settings.provider_config().await?;
        if !config.enabled {
            return Err(ManagerError::ProviderDisabled);
        }
        match self.throttled(&config)?.get_entry(email).await {
            Ok(entry) => Ok(entry),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn test_connection(&self) -> Result<(), ManagerError> {
        let config = self.settings.provider_config().await?;
        if !config.enabled {
            return Err(ManagerError::ProviderDisabled);
        }
        if !config.has_credentials() {
            return Err(ProviderError::MissingCredentials.into());
        }
        self.throttled(&config)?.check_account().await?;
        info!("✅ Provider connection test passed");
        Ok(())
    }

    /// Starts a background run when the provider is enabled
    pub async fn request_sync(&self) -> Result<SyncStatus, ManagerError> {
        let config = self.settings.provider_config().await?;
        if !config.enabled {
            return Err(ManagerError::ProviderDisabled);
        }
        self.coordinator.spawn_trigger();
        Ok(self.coordinator.status())
    }

    pub async fn sync_status_report(&self) -> SyncStatusReport {
        let status = self.coordinator.status();
        let provider_enabled = match self.settings.provider_config().await {
            Ok(config) => config.enabled,
            Err(e) => {
                warn!("Failed to read provider settings: {}", e);
                false
            }
        };
        let provider_record_count = if provider_enabled {
            self.repository
                .count_by_source(SuppressionSource::Provider)
                .await
                .inspect_err(|e| warn!("Failed to count provider records: {}", e))
                .ok()
        } else {
            None
        };

        SyncStatusReport {
            status,
            provider_enabled,
            provider_record_count,
        }
    }
}

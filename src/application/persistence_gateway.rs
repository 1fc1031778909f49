//! Persistence gateway
//!
//! Applies a reconciliation plan to the local store in fixed-size batches so
//! that no statement exceeds the backend's bound-parameter limit.
//! Batches are independent: a failure stops the remaining batches of that
//! operation, and batches already written stay written.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{StoreError, SuppressionRecord, SuppressionRepository, SuppressionSource};
use crate::infrastructure::config::defaults;

/// Which gateway operation a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceOperation {
    Add,
    Update,
    Remove,
}

impl fmt::Display for PersistenceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
        })
    }
}

#[derive(Error, Debug)]
#[error("{operation} batch {failed_batch} failed after {applied_batches} batches ({applied_records} records) were applied: {source}")]
pub struct PersistenceError {
    pub operation: PersistenceOperation,
    /// 1-based index of the batch that failed
    pub failed_batch: usize,
    pub applied_batches: usize,
    pub applied_records: usize,
    #[source]
    pub source: StoreError,
}

pub struct PersistenceGateway {
    repository: Arc<dyn SuppressionRepository>,
    batch_size: usize,
}

impl PersistenceGateway {
    /// A `batch_size` of zero falls back to the default.
    pub fn new(repository: Arc<dyn SuppressionRepository>, batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 {
            defaults::BATCH_SIZE
        } else {
            batch_size
        };
        Self {
            repository,
            batch_size,
        }
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn apply_additions(
        &self,
        records: &[SuppressionRecord],
    ) -> Result<usize, PersistenceError> {
        self.upsert_in_batches(PersistenceOperation::Add, records).await
    }

    pub async fn apply_updates(
        &self,
        records: &[SuppressionRecord],
    ) -> Result<usize, PersistenceError> {
        self.upsert_in_batches(PersistenceOperation::Update, records).await
    }

    /// Deletes provider-sourced rows for the given emails
    pub async fn apply_removals(&self, emails: &[String]) -> Result<usize, PersistenceError> {
        let mut applied_batches = 0;
        let mut applied_records = 0;

        for chunk in emails.chunks(self.batch_size) {
            match self
                .repository
                .delete_batch(SuppressionSource::Provider, chunk)
                .await
            {
                Ok(deleted) => {
                    applied_batches += 1;
                    applied_records += Self::written(deleted, chunk.len());
                    debug!(batch = applied_batches, deleted, "Removal batch applied");
                }
                Err(source) => {
                    return Err(Self::batch_failed(
                        PersistenceOperation::Remove,
                        applied_batches,
                        applied_records,
                        source,
                    ));
                }
            }
        }

        if applied_records > 0 {
            info!("🗑️ Removed {} records in {} batches", applied_records, applied_batches);
        }
        Ok(applied_records)
    }

    async fn upsert_in_batches(
        &self,
        operation: PersistenceOperation,
        records: &[SuppressionRecord],
    ) -> Result<usize, PersistenceError> {
        let mut applied_batches = 0;
        let mut applied_records = 0;

        for chunk in records.chunks(self.batch_size) {
            match self.repository.upsert_batch(chunk).await {
                Ok(written) => {
                    applied_batches += 1;
                    let written = Self::written(written, chunk.len());
                    applied_records += written;
                    if written < chunk.len() {
                        warn!(
                            "{} batch {}: {} of {} records written, the rest are manual",
                            operation,
                            applied_batches,
                            written,
                            chunk.len()
                        );
                    }
                    debug!(%operation, batch = applied_batches, written, "Upsert batch applied");
                }
                Err(source) => {
                    return Err(Self::batch_failed(
                        operation,
                        applied_batches,
                        applied_records,
                        source,
                    ));
                }
            }
        }

        if applied_records > 0 {
            info!(
                "💾 Applied {} {} records in {} batches",
                applied_records, operation, applied_batches
            );
        }
        Ok(applied_records)
    }

    /// Rows the store reports as touched, never more than the chunk held
    fn written(rows_affected: u64, chunk_len: usize) -> usize {
        usize::try_from(rows_affected).map_or(chunk_len, |rows| rows.min(chunk_len))
    }

    fn batch_failed(
        operation: PersistenceOperation,
        applied_batches: usize,
        applied_records: usize,
        source: StoreError,
    ) -> PersistenceError {
        error!(
            "❌ {} batch {} failed: {}",
            operation,
            applied_batches + 1,
            source
        );
        PersistenceError {
            operation,
            failed_batch: applied_batches + 1,
            applied_batches,
            applied_records,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemorySuppressionRepository;
    use chrono::Utc;

    fn provider_records(count: usize) -> Vec<SuppressionRecord> {
        let now = Utc::now();
        (0..count)
            .map(|i| {
                SuppressionRecord::new(
                    format!("user{i:03}@x.io"),
                    "BOUNCE",
                    SuppressionSource::Provider,
                    now,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn additions_are_chunked_into_batches() {
        let repo = Arc::new(InMemorySuppressionRepository::new());
        let gateway = PersistenceGateway::new(repo.clone(), 100);

        let applied = gateway.apply_additions(&provider_records(250)).await.unwrap();

        assert_eq!(applied, 250);
        assert_eq!(repo.upsert_batch_sizes(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn removals_issue_one_delete_per_batch() {
        let repo = Arc::new(InMemorySuppressionRepository::with_records(provider_records(150)));
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let emails: Vec<String> = provider_records(150).into_iter().map(|r| r.email).collect();

        let removed = gateway.apply_removals(&emails).await.unwrap();

        assert_eq!(removed, 150);
        assert_eq!(repo.delete_batch_sizes(), vec![100, 50]);
        assert_eq!(repo.len(), 0);
    }

    #[tokio::test]
    async fn failing_batch_reports_applied_progress() {
        let repo = Arc::new(InMemorySuppressionRepository::new().fail_upsert_batch_at(3));
        let gateway = PersistenceGateway::new(repo.clone(), 100);

        let err = gateway.apply_additions(&provider_records(450)).await.unwrap_err();

        assert_eq!(err.operation, PersistenceOperation::Add);
        assert_eq!(err.failed_batch, 3);
        assert_eq!(err.applied_batches, 2);
        assert_eq!(err.applied_records, 200);
        assert_eq!(repo.len(), 200);
    }

    #[tokio::test]
    async fn applying_twice_is_idempotent() {
        let repo = Arc::new(InMemorySuppressionRepository::new());
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let records = provider_records(120);

        gateway.apply_additions(&records).await.unwrap();
        gateway.apply_additions(&records).await.unwrap();

        assert_eq!(repo.len(), 120);
    }

    #[tokio::test]
    async fn rows_owned_by_manual_records_are_not_counted_as_applied() {
        let manual =
            SuppressionRecord::new("user001@x.io", "Manual", SuppressionSource::Manual, Utc::now());
        let repo = Arc::new(InMemorySuppressionRepository::with_records([manual]));
        let gateway = PersistenceGateway::new(repo.clone(), 100);

        let applied = gateway.apply_additions(&provider_records(3)).await.unwrap();

        assert_eq!(applied, 2);
        assert_eq!(repo.upsert_batch_sizes(), vec![3]);
        assert_eq!(repo.get("user001@x.io").unwrap().source, SuppressionSource::Manual);
    }

    #[tokio::test]
    async fn removals_count_only_deleted_rows() {
        let repo = Arc::new(InMemorySuppressionRepository::with_records(provider_records(2)));
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let emails = vec!["user000@x.io".to_string(), "gone@x.io".to_string()];

        let removed = gateway.apply_removals(&emails).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn zero_batch_size_uses_default() {
        let repo = Arc::new(InMemorySuppressionRepository::new());
        let gateway = PersistenceGateway::new(repo, 0);
        assert_eq!(gateway.batch_size(), defaults::BATCH_SIZE);
    }
}

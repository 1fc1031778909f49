//! Repository interfaces for the local suppression store
//!
//! Contains the trait every storage backend implements for the sync engine
//! and the administrative operations.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::suppression::{SuppressionRecord, SuppressionSource};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unknown source tag '{0}' in suppression row")]
    UnknownSource(String),
}

#[async_trait]
pub trait SuppressionRepository: Send + Sync {
    /// All records carrying the given source tag
    async fn find_by_source(
        &self,
        source: SuppressionSource,
    ) -> Result<Vec<SuppressionRecord>, StoreError>;

    /// Insert-or-replace by email for one batch.
    ///
    /// A conflicting row is only overwritten when its source tag matches the
    /// incoming record's tag. Returns the number of rows written.
    async fn upsert_batch(&self, records: &[SuppressionRecord]) -> Result<u64, StoreError>;

    /// Deletes the listed emails that carry `source`. Returns rows deleted.
    async fn delete_batch(
        &self,
        source: SuppressionSource,
        emails: &[String],
    ) -> Result<u64, StoreError>;

    async fn count_by_source(&self, source: SuppressionSource) -> Result<u64, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<SuppressionRecord>, StoreError>;
}

//! SQLite implementation of the suppression repository
//!
//! Used for local mode and tests. Multi-row statements are built with
//! `QueryBuilder` so each batch is a single round trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::domain::{StoreError, SuppressionRecord, SuppressionRepository, SuppressionSource};

/// Column tuple shared by both SQL backends
pub(crate) type SuppressionRow = (String, String, String, DateTime<Utc>, DateTime<Utc>);

pub(crate) fn row_to_record(row: SuppressionRow) -> Result<SuppressionRecord, StoreError> {
    let (email, reason, source, created_at, updated_at) = row;
    let source = source
        .parse::<SuppressionSource>()
        .map_err(|_| StoreError::UnknownSource(source))?;
    Ok(SuppressionRecord {
        email,
        reason,
        source,
        created_at,
        updated_at,
    })
}

pub struct SqliteSuppressionRepository {
    pool: SqlitePool,
}

impl SqliteSuppressionRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionRepository for SqliteSuppressionRepository {
    async fn find_by_source(
        &self,
        source: SuppressionSource,
    ) -> Result<Vec<SuppressionRecord>, StoreError> {
        let rows: Vec<SuppressionRow> = sqlx::query_as(
            "SELECT email, reason, source, created_at, updated_at FROM suppressions WHERE source = ? ORDER BY email",
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn upsert_batch(&self, records: &[SuppressionRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO suppressions (email, reason, source, created_at, updated_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.email.clone())
                .push_bind(record.reason.clone())
                .push_bind(record.source.as_str())
                .push_bind(record.created_at)
                .push_bind(record.updated_at);
        });
        builder.push(
            " ON CONFLICT(email) DO UPDATE SET reason = excluded.reason, updated_at = excluded.updated_at \
             WHERE suppressions.source = excluded.source",
        );

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_batch(
        &self,
        source: SuppressionSource,
        emails: &[String],
    ) -> Result<u64, StoreError> {
        if emails.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM suppressions WHERE source = ");
        builder.push_bind(source.as_str());
        builder.push(" AND email IN (");
        let mut separated = builder.separated(", ");
        for email in emails {
            separated.push_bind(email.clone());
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count_by_source(&self, source: SuppressionSource) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM suppressions WHERE source = ?")
            .bind(source.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<SuppressionRecord>, StoreError> {
        let row: Option<SuppressionRow> = sqlx::query_as(
            "SELECT email, reason, source, created_at, updated_at FROM suppressions WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }
}

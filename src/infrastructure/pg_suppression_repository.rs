//! PostgreSQL implementation of the suppression repository
//!
//! Production store shared with the monitoring dashboard.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{StoreError, SuppressionRecord, SuppressionRepository, SuppressionSource};
use crate::infrastructure::sqlite_suppression_repository::{SuppressionRow, row_to_record};

pub struct PgSuppressionRepository {
    pool: PgPool,
}

impl PgSuppressionRepository {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionRepository for PgSuppressionRepository {
    async fn find_by_source(
        &self,
        source: SuppressionSource,
    ) -> Result<Vec<SuppressionRecord>, StoreError> {
        let rows: Vec<SuppressionRow> = sqlx::query_as(
            "SELECT email, reason, source, created_at, updated_at FROM suppressions WHERE source = $1 ORDER BY email",
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

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
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
            " ON CONFLICT (email) DO UPDATE SET reason = EXCLUDED.reason, updated_at = EXCLUDED.updated_at \
             WHERE suppressions.source = EXCLUDED.source",
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

        let result = sqlx::query("DELETE FROM suppressions WHERE source = $1 AND email = ANY($2)")
            .bind(source.as_str())
            .bind(emails)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_source(&self, source: SuppressionSource) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM suppressions WHERE source = $1")
            .bind(source.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<SuppressionRecord>, StoreError> {
        let row: Option<SuppressionRow> = sqlx::query_as(
            "SELECT email, reason, source, created_at, updated_at FROM suppressions WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }
}

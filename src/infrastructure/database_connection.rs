// Database connection and pool management
// SQLite serves local mode and tests, PostgreSQL is the production store

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Ensure the database file exists by creating it if necessary
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)
                    .with_context(|| format!("Failed to create database file {db_path}"))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_suppressions_sql = r"
            CREATE TABLE IF NOT EXISTS suppressions (
                email TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'AWS',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        ";

        sqlx::query(create_suppressions_sql).execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_suppressions_source ON suppressions (source)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_suppressions_updated_at ON suppressions (updated_at)",
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite schema ready");
        Ok(())
    }
}

pub struct PgDatabaseConnection {
    pool: PgPool,
}

impl PgDatabaseConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS suppressions (
                email VARCHAR(255) PRIMARY KEY,
                reason TEXT NOT NULL,
                source VARCHAR(50) NOT NULL DEFAULT 'AWS',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_suppressions_source ON suppressions (source)",
            "CREATE INDEX IF NOT EXISTS idx_suppressions_updated_at ON suppressions (updated_at)",
            r"
            CREATE TABLE IF NOT EXISTS app_settings (
                key VARCHAR(100) PRIMARY KEY,
                value TEXT NOT NULL DEFAULT '',
                description TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
            r"
            INSERT INTO app_settings (key, value, description) VALUES
                ('aws_enabled', 'false', 'Enable AWS SES integration'),
                ('aws_region', 'us-east-1', 'AWS region'),
                ('aws_access_key', '', 'AWS access key id'),
                ('aws_secret_key', '', 'AWS secret access key'),
                ('aws_sync_interval', '60', 'Suppression sync interval in minutes')
            ON CONFLICT (key) DO NOTHING
            ",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("PostgreSQL schema ready");
        Ok(())
    }
}

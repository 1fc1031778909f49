//! Provider settings sources
//!
//! `PgProviderSettings` reads the dashboard's `app_settings` key/value table;
//! `StaticProviderSettings` serves a fixed configuration (config file, tests).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::domain::{ProviderConfig, ProviderSettings, SettingsError};

pub const KEY_ENABLED: &str = "aws_enabled";
pub const KEY_REGION: &str = "aws_region";
pub const KEY_ACCESS_KEY: &str = "aws_access_key";
pub const KEY_SECRET_KEY: &str = "aws_secret_key";
pub const KEY_SYNC_INTERVAL: &str = "aws_sync_interval";

const PROVIDER_KEYS: [&str; 5] = [
    KEY_ENABLED,
    KEY_REGION,
    KEY_ACCESS_KEY,
    KEY_SECRET_KEY,
    KEY_SYNC_INTERVAL,
];

/// Builds a [`ProviderConfig`] from raw settings rows.
///
/// Missing keys keep their zero value; only a non-numeric interval is an error.
pub fn provider_config_from_values(
    values: &HashMap<String, String>,
) -> Result<ProviderConfig, SettingsError> {
    let text = |key: &str| values.get(key).map(|v| v.trim().to_string()).unwrap_or_default();

    let sync_interval_minutes = match values.get(KEY_SYNC_INTERVAL).map(|v| v.trim()) {
        None | Some("") => 0,
        Some(raw) => raw.parse::<u64>().map_err(|_| SettingsError::Malformed {
            key: KEY_SYNC_INTERVAL.to_string(),
            value: raw.to_string(),
        })?,
    };

    Ok(ProviderConfig {
        enabled: text(KEY_ENABLED).eq_ignore_ascii_case("true"),
        region: text(KEY_REGION),
        access_key: text(KEY_ACCESS_KEY),
        secret_key: text(KEY_SECRET_KEY),
        sync_interval_minutes,
    })
}

pub struct PgProviderSettings {
    pool: PgPool,
}

impl PgProviderSettings {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderSettings for PgProviderSettings {
    async fn provider_config(&self) -> Result<ProviderConfig, SettingsError> {
        let keys: Vec<String> = PROVIDER_KEYS.iter().map(|k| (*k).to_string()).collect();
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM app_settings WHERE key = ANY($1)")
                .bind(&keys)
                .fetch_all(&self.pool)
                .await?;
        debug!(keys = rows.len(), "Loaded provider settings");

        provider_config_from_values(&rows.into_iter().collect())
    }
}

/// Fixed settings, replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticProviderSettings {
    config: RwLock<ProviderConfig>,
}

impl StaticProviderSettings {
    pub const fn new(config: ProviderConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Swaps the served configuration; later reads see the new values
    pub fn replace(&self, config: ProviderConfig) {
        let mut guard = self
            .config
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = config;
    }
}

#[async_trait]
impl ProviderSettings for StaticProviderSettings {
    async fn provider_config(&self) -> Result<ProviderConfig, SettingsError> {
        let guard = self
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.clone())
    }
}

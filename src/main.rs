use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use suppression_sync::application::SyncCoordinator;
use suppression_sync::domain::{ProviderSettings, SuppressionRepository};
use suppression_sync::infrastructure::logging::{init_logging_with_config, log_system_info};
use suppression_sync::infrastructure::{
    AppConfig, DatabaseConnection, PgDatabaseConnection, PgProviderSettings,
    PgSuppressionRepository, SesClientFactory, SqliteSuppressionRepository, StaticProviderSettings,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging_with_config(config.logging.clone())?;
    log_system_info();

    // requests go out unsigned, so refuse to start against the public endpoint
    let factory = SesClientFactory::unsigned(config.provider.clone())
        .context("Failed to build provider client factory")?;
    let (settings, repository) = open_store(&config).await?;

    let coordinator = Arc::new(SyncCoordinator::new(
        settings,
        Arc::new(factory),
        repository,
        config.sync.to_options(),
    ));

    let shutdown = CancellationToken::new();
    let worker = Arc::clone(&coordinator).start_background_sync(shutdown.clone());
    info!("🚀 Suppression sync running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = worker.await {
        error!("Background sync task ended abnormally: {}", e);
    }
    info!("👋 Suppression sync stopped");
    Ok(())
}

/// PostgreSQL carries both the suppression table and the settings table;
/// SQLite is paired with the settings from the config file.
async fn open_store(
    config: &AppConfig,
) -> Result<(Arc<dyn ProviderSettings>, Arc<dyn SuppressionRepository>)> {
    if config.database.is_sqlite() {
        let db = DatabaseConnection::with_max_connections(
            &config.database.url,
            config.database.max_connections,
        )
        .await?;
        db.migrate().await?;
        info!("🗄️ Using SQLite store: {}", config.database.redacted_url());

        let settings = StaticProviderSettings::new(config.provider.static_settings());
        let repository = SqliteSuppressionRepository::new(db.pool().clone());
        return Ok((Arc::new(settings), Arc::new(repository)));
    }

    let db =
        PgDatabaseConnection::new(&config.database.url, config.database.max_connections).await?;
    db.migrate().await?;
    info!("🗄️ Using PostgreSQL store: {}", config.database.redacted_url());

    let settings = PgProviderSettings::new(db.pool().clone());
    let repository = PgSuppressionRepository::new(db.pool().clone());
    Ok((Arc::new(settings), Arc::new(repository)))
}

//! Logging system configuration and initialization
//!
//! This module provides the logging setup with:
//! - Console output (text or structured JSON)
//! - Optional daily rolling file output
//! - Config based log level control with `RUST_LOG` override
//! - Log files stored relative to executable location unless configured

#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Re-export LoggingConfig from config module
pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "suppression-sync.log";

// Global guard to keep the log file writer alive
static LOG_GUARDS: Lazy<Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

/// Get the log directory relative to the executable location
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Builds the filter used when `RUST_LOG` is not set.
///
/// Dependency chatter (SQL statements, HTTP internals) is suppressed unless
/// the configured level is `trace`; `module_filters` entries are applied last.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))?;

    if !config.level.to_lowercase().contains("trace") {
        for directive in [
            "sqlx::query=warn",
            "sqlx::postgres=warn",
            "sqlx::sqlite=warn",
            "reqwest=info",
            "hyper=warn",
            "h2=warn",
        ] {
            filter = filter.add_directive(directive.parse()?);
        }
    }

    let mut modules: Vec<_> = config.module_filters.iter().collect();
    modules.sort();
    for (module, level) in modules {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| anyhow!("Invalid module filter '{}': {}", directive, e))?,
        );
    }

    Ok(filter)
}

/// Initialize logging with custom configuration
///
/// # Environment Variable Override
/// `RUST_LOG` replaces the configured filter entirely:
/// ```bash
/// # Show all SQL statements
/// RUST_LOG="debug,sqlx::query=debug" suppression-sync
/// ```
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_env_filter(&config)?,
    };
    let registry = Registry::default().with(env_filter);

    let file_writer = if config.file_output {
        let log_dir = config.log_dir.clone().unwrap_or_else(get_log_directory);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        let (writer, guard) = non_blocking(rolling::daily(&log_dir, LOG_FILE_PREFIX));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);
        Some((writer, log_dir))
    } else {
        None
    };

    match (file_writer, config.console_output) {
        (Some((writer, _)), true) => {
            let file_layer = fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);
            if config.json_format {
                registry
                    .with(file_layer)
                    .with(fmt::Layer::new().json().with_writer(std::io::stdout))
                    .try_init()?;
            } else {
                registry
                    .with(file_layer)
                    .with(fmt::Layer::new().with_writer(std::io::stdout).with_target(false))
                    .try_init()?;
            }
        }
        (Some((writer, _)), false) => {
            registry
                .with(
                    fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_target(true)
                        .with_ansi(false),
                )
                .try_init()?;
        }
        (None, true) => {
            if config.json_format {
                registry
                    .with(fmt::Layer::new().json().with_writer(std::io::stdout))
                    .try_init()?;
            } else {
                registry
                    .with(fmt::Layer::new().with_writer(std::io::stdout).with_target(false))
                    .try_init()?;
            }
        }
        (None, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    if config.file_output {
        info!(
            "Log directory: {:?}",
            config.log_dir.clone().unwrap_or_else(get_log_directory)
        );
    }
    if !config.level.to_lowercase().contains("trace") {
        info!("SQL and HTTP internals suppressed (use TRACE level to see all logs)");
    }

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Suppression Sync System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    info!("===========================================");
}

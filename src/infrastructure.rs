//! Infrastructure layer: storage backends, the provider HTTP client,
//! configuration loading and logging.

pub mod config;
pub mod database_connection;
pub mod logging;
pub mod pg_suppression_repository;
pub mod ses_client;
pub mod settings_repository;
pub mod sqlite_suppression_repository;
pub mod throttled_provider;

pub use config::AppConfig;
pub use database_connection::{DatabaseConnection, PgDatabaseConnection};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use pg_suppression_repository::PgSuppressionRepository;
pub use ses_client::{PassthroughSigner, RequestSigner, SesClientFactory, SesSuppressionClient};
pub use settings_repository::{PgProviderSettings, StaticProviderSettings};
pub use sqlite_suppression_repository::SqliteSuppressionRepository;
pub use throttled_provider::ThrottledProvider;

//! Application layer module
//!
//! This module contains the synchronization pipeline and the administrative
//! use cases that orchestrate the domain logic.

pub mod persistence_gateway;
pub mod remote_fetcher;
pub mod suppression_manager;
pub mod sync_coordinator;

pub use persistence_gateway::{PersistenceError, PersistenceGateway, PersistenceOperation};
pub use remote_fetcher::{FetchFailure, FetchPolicy, FetchResult, RemoteListFetcher};
pub use suppression_manager::{BulkOutcome, ManagerError, SuppressionManager, SyncStatusReport};
pub use sync_coordinator::{
    SchedulePolicy, SkipReason, SyncCoordinator, SyncError, SyncOptions, SyncOutcome, SyncReport,
    SyncStatus,
};

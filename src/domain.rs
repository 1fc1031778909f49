//! Domain module - Core suppression-list entities and pure logic
//!
//! This module contains the suppression entities, the reconciliation planner
//! and the trait seams towards the remote provider, the settings store and
//! the local suppression store.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod provider;
pub mod reconciliation;
pub mod repositories;
pub mod suppression;

// Re-export commonly used items for convenience
pub use provider::{
    ProviderConfig, ProviderError, ProviderFactory, ProviderPage, ProviderSettings,
    SettingsError, SuppressionListProvider,
};
pub use reconciliation::{LocalSnapshot, ReconciliationPlan, plan};
pub use repositories::{StoreError, SuppressionRepository};
pub use suppression::{
    RemoteSuppressionEntry, SuppressionReason, SuppressionRecord, SuppressionSource,
};

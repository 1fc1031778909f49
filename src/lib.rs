//! Suppression-list synchronization engine
//!
//! Mirrors the email provider's account-level suppression list into the local
//! store, keeps operator-added entries untouched, and exposes the operations
//! an admin surface needs (manual add/remove, status, on-demand sync).

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

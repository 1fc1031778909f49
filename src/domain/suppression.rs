//! # Suppression Entities
//!
//! Local suppression records, transient entries reported by the remote
//! provider, and the source tag that separates the two populations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a local suppression record.
///
/// Only [`SuppressionSource::Provider`] records take part in reconciliation;
/// operator-added records are never touched by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuppressionSource {
    /// Mirrored from the remote provider's suppression list
    #[serde(rename = "AWS")]
    Provider,
    /// Added by an operator through the dashboard
    Manual,
}

impl SuppressionSource {
    /// Tag stored in the `source` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "AWS",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for SuppressionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuppressionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWS" => Ok(Self::Provider),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("unknown suppression source tag '{other}'")),
        }
    }
}

/// Reason codes the provider accepts when an address is pushed to its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuppressionReason {
    Bounce,
    Complaint,
}

impl SuppressionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bounce => "BOUNCE",
            Self::Complaint => "COMPLAINT",
        }
    }

    /// Maps operator free text onto a provider reason code.
    ///
    /// Anything that does not mention a bounce is filed as a complaint.
    #[must_use]
    pub fn from_free_text(text: &str) -> Self {
        if text.to_ascii_lowercase().contains("bounce") {
            Self::Bounce
        } else {
            Self::Complaint
        }
    }
}

/// A suppression entry persisted in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionRecord {
    /// Email address, unique across the local store
    pub email: String,
    pub reason: String,
    pub source: SuppressionSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SuppressionRecord {
    /// Creates a fresh record with both timestamps set to `now`
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        reason: impl Into<String>,
        source: SuppressionSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            email: email.into(),
            reason: reason.into(),
            source,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_provider_sourced(&self) -> bool {
        self.source == SuppressionSource::Provider
    }
}

/// A suppressed destination as reported by the remote provider.
///
/// Never stored directly: the planner converts it into a [`SuppressionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSuppressionEntry {
    pub email: String,
    pub reason: String,
    /// Provider-side audit timestamp; not used for diff decisions
    pub last_update: Option<DateTime<Utc>>,
}

impl RemoteSuppressionEntry {
    #[must_use]
    pub fn new(email: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            reason: reason.into(),
            last_update: None,
        }
    }

    /// Converts the entry into a provider-sourced local record
    #[must_use]
    pub fn to_record(&self, now: DateTime<Utc>) -> SuppressionRecord {
        SuppressionRecord::new(
            self.email.clone(),
            self.reason.clone(),
            SuppressionSource::Provider,
            now,
        )
    }
}

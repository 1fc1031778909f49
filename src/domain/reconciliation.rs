//! # Reconciliation Planner
//!
//! Computes the minimal change-set that brings the local provider-sourced
//! suppression records in line with the provider's list.
//!
//! The planner is pure: identical inputs always produce an identical plan,
//! and every set in the plan is ordered by email.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::suppression::{RemoteSuppressionEntry, SuppressionRecord};

/// Local provider-sourced records keyed by email.
///
/// Records from other sources are only remembered by email: they can never
/// become removal candidates, and remote entries colliding with them are
/// not planned as additions.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    records: BTreeMap<String, SuppressionRecord>,
    foreign: BTreeSet<String>,
}

impl LocalSnapshot {
    pub fn from_records(records: impl IntoIterator<Item = SuppressionRecord>) -> Self {
        let mut map = BTreeMap::new();
        let mut foreign = BTreeSet::new();
        for record in records {
            if record.is_provider_sourced() {
                map.insert(record.email.clone(), record);
            } else {
                foreign.insert(record.email);
            }
        }
        if !foreign.is_empty() {
            debug!(excluded = foreign.len(), "Excluded non-provider records from local snapshot");
        }
        Self {
            records: map,
            foreign,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, email: &str) -> Option<&SuppressionRecord> {
        self.records.get(email)
    }

    /// The email is stored locally under a non-provider source
    #[must_use]
    pub fn is_foreign(&self, email: &str) -> bool {
        self.foreign.contains(email)
    }

    pub fn emails(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

/// Additions, updates and removals for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Present remotely, absent locally
    pub to_add: Vec<SuppressionRecord>,
    /// Present in both with a different reason
    pub to_update: Vec<SuppressionRecord>,
    /// Provider-sourced locally, absent remotely
    pub to_remove: Vec<String>,
    /// Present remotely but owned locally by another source; left alone
    pub shadowed: Vec<String>,
}

impl ReconciliationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    /// Provider-sourced rows the local store should hold once the plan is applied
    #[must_use]
    pub fn expected_provider_count(&self, remote_emails: usize) -> usize {
        remote_emails.saturating_sub(self.shadowed.len())
    }

    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }
}

/// Diffs the remote list against the local snapshot.
///
/// Reasons are compared byte-for-byte; timestamps are never compared.
/// Duplicate remote emails collapse onto the last occurrence. Remote entries
/// whose email is held locally by another source go to `shadowed`.
#[must_use]
pub fn plan(
    remote: &[RemoteSuppressionEntry],
    local: &LocalSnapshot,
    now: DateTime<Utc>,
) -> ReconciliationPlan {
    let remote_map: BTreeMap<&str, &RemoteSuppressionEntry> = remote
        .iter()
        .map(|entry| (entry.email.as_str(), entry))
        .collect();

    let mut result = ReconciliationPlan::default();

    for (email, entry) in &remote_map {
        match local.get(email) {
            None if local.is_foreign(email) => result.shadowed.push((*email).to_owned()),
            None => result.to_add.push(entry.to_record(now)),
            Some(existing) if existing.reason != entry.reason => {
                result.to_update.push(SuppressionRecord {
                    email: existing.email.clone(),
                    reason: entry.reason.clone(),
                    source: existing.source,
                    created_at: existing.created_at,
                    updated_at: now,
                });
            }
            Some(_) => {}
        }
    }

    result.to_remove = local
        .emails()
        .filter(|email| !remote_map.contains_key(email))
        .map(str::to_owned)
        .collect();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::suppression::SuppressionSource;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn provider_record(email: &str, reason: &str, at: DateTime<Utc>) -> SuppressionRecord {
        SuppressionRecord::new(email, reason, SuppressionSource::Provider, at)
    }

    fn add_emails(plan: &ReconciliationPlan) -> Vec<&str> {
        plan.to_add.iter().map(|r| r.email.as_str()).collect()
    }

    #[test]
    fn add_and_remove_scenario() {
        let now = Utc::now();
        let local = LocalSnapshot::from_records([
            provider_record("a", "bounce", now),
            provider_record("b", "complaint", now),
        ]);
        let remote = [
            RemoteSuppressionEntry::new("a", "bounce"),
            RemoteSuppressionEntry::new("c", "complaint"),
        ];

        let plan = plan(&remote, &local, now);

        assert_eq!(add_emails(&plan), vec!["c"]);
        assert!(plan.to_update.is_empty());
        assert_eq!(plan.to_remove, vec!["b".to_string()]);
    }

    #[test]
    fn reason_change_becomes_update_with_fresh_timestamp() {
        let created = Utc::now() - Duration::days(3);
        let now = Utc::now();
        let local = LocalSnapshot::from_records([provider_record("a", "bounce", created)]);
        let remote = [RemoteSuppressionEntry::new("a", "complaint")];

        let plan = plan(&remote, &local, now);

        assert!(plan.to_add.is_empty());
        assert!(plan.to_remove.is_empty());
        assert_eq!(plan.to_update.len(), 1);
        let updated = &plan.to_update[0];
        assert_eq!(updated.reason, "complaint");
        assert_eq!(updated.created_at, created);
        assert_eq!(updated.updated_at, now);
    }

    #[test]
    fn reason_comparison_is_case_sensitive() {
        let now = Utc::now();
        let local = LocalSnapshot::from_records([provider_record("a", "BOUNCE", now)]);
        let remote = [RemoteSuppressionEntry::new("a", "bounce")];

        assert_eq!(plan(&remote, &local, now).to_update.len(), 1);
    }

    #[test]
    fn provider_timestamps_do_not_trigger_updates() {
        let now = Utc::now();
        let local = LocalSnapshot::from_records([provider_record("a", "BOUNCE", now)]);
        let mut entry = RemoteSuppressionEntry::new("a", "BOUNCE");
        entry.last_update = Some(now + Duration::hours(1));

        assert!(plan(&[entry], &local, now).is_empty());
    }

    #[test]
    fn empty_remote_removes_every_provider_record() {
        let now = Utc::now();
        let local = LocalSnapshot::from_records([
            provider_record("a", "bounce", now),
            provider_record("b", "complaint", now),
        ]);

        let plan = plan(&[], &local, now);

        assert_eq!(plan.to_remove, vec!["a".to_string(), "b".to_string()]);
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn manual_records_never_become_removal_candidates() {
        let now = Utc::now();
        let local = LocalSnapshot::from_records([
            provider_record("a", "bounce", now),
            SuppressionRecord::new("m", "operator", SuppressionSource::Manual, now),
        ]);

        assert_eq!(local.len(), 1);
        assert_eq!(plan(&[], &local, now).to_remove, vec!["a".to_string()]);
    }

    #[test]
    fn remote_entry_owned_by_manual_record_is_shadowed() {
        let now = Utc::now();
        let local = LocalSnapshot::from_records([SuppressionRecord::new(
            "m",
            "operator",
            SuppressionSource::Manual,
            now,
        )]);
        let remote = [
            RemoteSuppressionEntry::new("m", "BOUNCE"),
            RemoteSuppressionEntry::new("n", "BOUNCE"),
        ];

        let plan = plan(&remote, &local, now);

        assert_eq!(add_emails(&plan), vec!["n"]);
        assert_eq!(plan.shadowed, vec!["m".to_string()]);
        assert!(plan.to_remove.is_empty());
        assert_eq!(plan.expected_provider_count(2), 1);
    }

    #[test]
    fn duplicate_remote_emails_collapse_to_last_entry() {
        let now = Utc::now();
        let remote = [
            RemoteSuppressionEntry::new("a", "BOUNCE"),
            RemoteSuppressionEntry::new("a", "COMPLAINT"),
        ];

        let plan = plan(&remote, &LocalSnapshot::default(), now);

        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_add[0].reason, "COMPLAINT");
    }

    fn apply(local: &LocalSnapshot, plan: &ReconciliationPlan) -> LocalSnapshot {
        let mut records: BTreeMap<String, SuppressionRecord> = local
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for record in plan.to_add.iter().chain(&plan.to_update) {
            records.insert(record.email.clone(), record.clone());
        }
        for email in &plan.to_remove {
            records.remove(email);
        }
        LocalSnapshot {
            records,
            foreign: local.foreign.clone(),
        }
    }

    fn entries_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[a-f]{1,2}", "(BOUNCE|COMPLAINT|other)"), 0..24)
    }

    fn remote_strategy() -> impl Strategy<Value = Vec<RemoteSuppressionEntry>> {
        prop::collection::vec(("m?[a-f]{1,2}", "(BOUNCE|COMPLAINT|other)"), 0..24).prop_map(
            |entries| {
                entries
                    .into_iter()
                    .map(|(email, reason)| RemoteSuppressionEntry::new(email, reason))
                    .collect()
            },
        )
    }

    fn snapshot(
        provider: Vec<(String, String)>,
        manual: Vec<String>,
        now: DateTime<Utc>,
    ) -> LocalSnapshot {
        LocalSnapshot::from_records(
            provider
                .into_iter()
                .map(|(email, reason)| provider_record(&email, &reason, now))
                .chain(manual.into_iter().map(|email| {
                    SuppressionRecord::new(email, "operator", SuppressionSource::Manual, now)
                })),
        )
    }

    fn manual_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("m[a-f]{1,2}", 0..6)
    }

    proptest! {
        #[test]
        fn plan_partitions_identifiers(
            remote in remote_strategy(),
            local in entries_strategy(),
            manual in manual_strategy(),
        ) {
            let now = Utc::now();
            let local = snapshot(local, manual, now);

            let plan = plan(&remote, &local, now);

            let adds: HashSet<_> = plan.to_add.iter().map(|r| r.email.clone()).collect();
            let updates: HashSet<_> = plan.to_update.iter().map(|r| r.email.clone()).collect();
            let removes: HashSet<_> = plan.to_remove.iter().cloned().collect();

            prop_assert_eq!(adds.len(), plan.to_add.len());
            prop_assert_eq!(updates.len(), plan.to_update.len());
            prop_assert_eq!(removes.len(), plan.to_remove.len());
            prop_assert!(adds.is_disjoint(&updates));
            prop_assert!(adds.is_disjoint(&removes));
            prop_assert!(updates.is_disjoint(&removes));
            for email in &adds {
                prop_assert!(!local.is_foreign(email));
            }
            for email in &plan.shadowed {
                prop_assert!(local.is_foreign(email));
                prop_assert!(!adds.contains(email));
            }
            for email in &removes {
                prop_assert!(local.get(email).is_some_and(SuppressionRecord::is_provider_sourced));
            }
        }

        #[test]
        fn applying_a_plan_converges(
            remote in remote_strategy(),
            local in entries_strategy(),
            manual in manual_strategy(),
        ) {
            let now = Utc::now();
            let local = snapshot(local, manual, now);

            let first = plan(&remote, &local, now);
            let reconciled = apply(&local, &first);
            let second = plan(&remote, &reconciled, now);

            prop_assert!(second.is_empty(), "second plan not empty: {:?}", second);
        }
    }
}

//! In-memory fakes for unit and integration tests
//!
//! `ScriptedProvider` serves a fixed remote list and records every call;
//! `InMemorySuppressionRepository` mirrors the SQL stores' upsert rules.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::{
    ProviderConfig, ProviderError, ProviderFactory, ProviderPage, RemoteSuppressionEntry,
    StoreError, SuppressionListProvider, SuppressionReason, SuppressionRecord,
    SuppressionRepository, SuppressionSource,
};

pub use crate::infrastructure::settings_repository::StaticProviderSettings;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected_failure(what: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!("injected {what} failure")))
}

/// Enabled settings with credentials and a 15 minute interval
#[must_use]
pub fn usable_provider_config() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        region: "us-east-1".to_string(),
        access_key: "AKIATESTKEY".to_string(),
        secret_key: "test-secret".to_string(),
        sync_interval_minutes: 15,
    }
}

/// Provider double serving a scripted suppression list.
///
/// Continuation tokens are offsets into the list, so pages follow the
/// requested page size.
#[derive(Default)]
pub struct ScriptedProvider {
    remote: Mutex<Vec<RemoteSuppressionEntry>>,
    fail_list_page_at: Option<u32>,
    fail_check_account: bool,
    fail_writes: bool,
    list_latency: Duration,

    list_calls: AtomicU32,
    total_calls: AtomicU32,
    calls: Mutex<Vec<Instant>>,
    puts: Mutex<Vec<(String, SuppressionReason)>>,
    deletes: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_remote_list(entries: impl IntoIterator<Item = RemoteSuppressionEntry>) -> Self {
        Self {
            remote: Mutex::new(entries.into_iter().collect()),
            ..Self::default()
        }
    }

    /// The n-th `list_page` call (1-based) fails with a transport error
    #[must_use]
    pub fn fail_list_page_at(mut self, call: u32) -> Self {
        self.fail_list_page_at = Some(call);
        self
    }

    #[must_use]
    pub fn fail_check_account(mut self) -> Self {
        self.fail_check_account = true;
        self
    }

    /// Puts and deletes fail with a provider HTTP error
    #[must_use]
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    #[must_use]
    pub fn with_list_latency(mut self, latency: Duration) -> Self {
        self.list_latency = latency;
        self
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// When each call (of any kind) reached the provider
    pub fn call_instants(&self) -> Vec<Instant> {
        lock(&self.calls).clone()
    }

    /// Successful puts, in call order
    pub fn puts(&self) -> Vec<(String, SuppressionReason)> {
        lock(&self.puts).clone()
    }

    /// Successful deletes, in call order
    pub fn deletes(&self) -> Vec<String> {
        lock(&self.deletes).clone()
    }

    pub fn remote_len(&self) -> usize {
        lock(&self.remote).len()
    }

    fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push(Instant::now());
    }

    fn write_failure() -> ProviderError {
        ProviderError::Http {
            status: 500,
            message: "scripted write failure".to_string(),
        }
    }
}

#[async_trait]
impl SuppressionListProvider for ScriptedProvider {
    async fn list_page(
        &self,
        token: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage, ProviderError> {
        self.record_call();
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.list_latency.is_zero() {
            tokio::time::sleep(self.list_latency).await;
        }
        if self.fail_list_page_at == Some(call) {
            return Err(ProviderError::Transport(format!("scripted failure on page {call}")));
        }

        let offset = match token {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidRequest(format!("unknown token '{raw}'")))?,
            None => 0,
        };
        let remote = lock(&self.remote);
        let end = remote.len().min(offset + page_size.max(1) as usize);
        let entries = remote.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < remote.len()).then(|| end.to_string());

        Ok(ProviderPage {
            entries,
            next_token,
        })
    }

    async fn get_entry(
        &self,
        email: &str,
    ) -> Result<Option<RemoteSuppressionEntry>, ProviderError> {
        self.record_call();
        Ok(lock(&self.remote).iter().find(|e| e.email == email).cloned())
    }

    async fn put_entry(&self, email: &str, reason: SuppressionReason) -> Result<(), ProviderError> {
        self.record_call();
        if self.fail_writes {
            return Err(Self::write_failure());
        }
        let mut remote = lock(&self.remote);
        remote.retain(|e| e.email != email);
        remote.push(RemoteSuppressionEntry::new(email, reason.as_str()));
        lock(&self.puts).push((email.to_string(), reason));
        Ok(())
    }

    async fn delete_entry(&self, email: &str) -> Result<(), ProviderError> {
        self.record_call();
        if self.fail_writes {
            return Err(Self::write_failure());
        }
        lock(&self.remote).retain(|e| e.email != email);
        lock(&self.deletes).push(email.to_string());
        Ok(())
    }

    async fn check_account(&self) -> Result<(), ProviderError> {
        self.record_call();
        if self.fail_check_account {
            return Err(ProviderError::Transport("scripted connection refused".to_string()));
        }
        Ok(())
    }
}

/// Hands out the same scripted provider for every usable configuration
pub struct ScriptedProviderFactory {
    provider: Arc<ScriptedProvider>,
    builds: AtomicU32,
}

impl ScriptedProviderFactory {
    #[must_use]
    pub const fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self {
            provider,
            builds: AtomicU32::new(0),
        }
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for ScriptedProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn SuppressionListProvider>, ProviderError> {
        if !config.enabled {
            return Err(ProviderError::Disabled);
        }
        if !config.has_credentials() {
            return Err(ProviderError::MissingCredentials);
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }
}

/// Map-backed repository with the same conflict rule as the SQL stores:
/// an upsert never touches a row owned by another source.
#[derive(Default)]
pub struct InMemorySuppressionRepository {
    records: Mutex<BTreeMap<String, SuppressionRecord>>,
    fail_upsert_batch_at: Option<u32>,
    fail_reads: AtomicBool,
    upsert_calls: AtomicU32,
    upsert_batch_sizes: Mutex<Vec<usize>>,
    delete_batch_sizes: Mutex<Vec<usize>>,
}

impl InMemorySuppressionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = SuppressionRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.email.clone(), r)).collect()),
            ..Self::default()
        }
    }

    /// The n-th `upsert_batch` call (1-based) fails without applying anything
    #[must_use]
    pub fn fail_upsert_batch_at(mut self, call: u32) -> Self {
        self.fail_upsert_batch_at = Some(call);
        self
    }

    /// Makes `find_by_source` fail until switched back
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, email: &str) -> Option<SuppressionRecord> {
        lock(&self.records).get(email).cloned()
    }

    pub fn all(&self) -> Vec<SuppressionRecord> {
        lock(&self.records).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    /// Sizes of the successfully applied upsert batches
    pub fn upsert_batch_sizes(&self) -> Vec<usize> {
        lock(&self.upsert_batch_sizes).clone()
    }

    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        lock(&self.delete_batch_sizes).clone()
    }
}

#[async_trait]
impl SuppressionRepository for InMemorySuppressionRepository {
    async fn find_by_source(
        &self,
        source: SuppressionSource,
    ) -> Result<Vec<SuppressionRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected_failure("read"));
        }
        Ok(lock(&self.records)
            .values()
            .filter(|r| r.source == source)
            .cloned()
            .collect())
    }

    async fn upsert_batch(&self, records: &[SuppressionRecord]) -> Result<u64, StoreError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_upsert_batch_at == Some(call) {
            return Err(injected_failure("upsert"));
        }

        let mut stored = lock(&self.records);
        let mut affected = 0;
        for record in records {
            match stored.get_mut(&record.email) {
                Some(existing) if existing.source != record.source => {}
                Some(existing) => {
                    existing.reason.clone_from(&record.reason);
                    existing.updated_at = record.updated_at;
                    affected += 1;
                }
                None => {
                    stored.insert(record.email.clone(), record.clone());
                    affected += 1;
                }
            }
        }
        lock(&self.upsert_batch_sizes).push(records.len());
        Ok(affected)
    }

    async fn delete_batch(
        &self,
        source: SuppressionSource,
        emails: &[String],
    ) -> Result<u64, StoreError> {
        let mut stored = lock(&self.records);
        let mut affected = 0;
        for email in emails {
            if stored.get(email).is_some_and(|r| r.source == source) {
                stored.remove(email);
                affected += 1;
            }
        }
        lock(&self.delete_batch_sizes).push(emails.len());
        Ok(affected)
    }

    async fn count_by_source(&self, source: SuppressionSource) -> Result<u64, StoreError> {
        let count = lock(&self.records).values().filter(|r| r.source == source).count();
        Ok(count as u64)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<SuppressionRecord>, StoreError> {
        Ok(self.get(email))
    }
}

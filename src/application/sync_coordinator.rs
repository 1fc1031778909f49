//! # Sync Coordinator
//!
//! Owns the single-flight run state and sequences one synchronization run:
//! settings → provider → reachability → fetch → local snapshot → plan →
//! add/update/remove → count verification.
//!
//! At most one run executes at a time. A trigger that arrives while a run is
//! in progress is coalesced into it and returns immediately. The run state
//! is reset by a drop guard, so the coordinator always returns to idle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant as StdInstant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::persistence_gateway::{PersistenceError, PersistenceGateway};
use crate::application::remote_fetcher::{FetchPolicy, RemoteListFetcher};
use crate::domain::{
    LocalSnapshot, ProviderConfig, ProviderError, ProviderFactory, ProviderSettings,
    SettingsError, StoreError, SuppressionRepository, SuppressionSource, plan,
};
use crate::infrastructure::config::defaults;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to read provider settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("failed to build provider client: {0}")]
    ProviderUnavailable(#[source] ProviderError),

    #[error("provider is unreachable: {0}")]
    Unreachable(#[source] ProviderError),

    #[error("fetch failed on page {page} ({discarded} fetched entries discarded): {source}")]
    Fetch {
        #[source]
        source: ProviderError,
        page: u32,
        discarded: usize,
    },

    #[error("failed to load local snapshot: {0}")]
    Snapshot(#[source] StoreError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Why a run ended without touching any data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Disabled,
    MissingCredentials,
}

/// Counters for a run that reached the persistence phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub pages: u32,
    pub fully_complete: bool,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Removal candidates not applied because the fetch was incomplete
    pub removals_withheld: usize,
    /// Remote entries left alone because a manual record owns the email
    pub shadowed: usize,
    /// Local provider-sourced count after the run, when it could be read
    pub local_count: Option<u64>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    /// Another run was in progress; this trigger was coalesced into it
    AlreadyRunning,
    Skipped(SkipReason),
    Completed(SyncReport),
}

/// Snapshot of the coordinator state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// `None` until the first run finished
    pub last_completed_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
}

/// Timing of the periodic loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub startup_delay: Duration,
    /// Wait used when settings are unreadable, disabled or too short
    pub fallback_interval: Duration,
    /// Intervals below this fall back to `fallback_interval`
    pub min_interval: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(defaults::STARTUP_DELAY_SECS),
            fallback_interval: Duration::from_secs(defaults::FALLBACK_INTERVAL_SECS),
            min_interval: Duration::from_secs(defaults::MIN_INTERVAL_SECS),
        }
    }
}

impl SchedulePolicy {
    /// Wait before the next periodic trigger for an enabled configuration
    #[must_use]
    pub fn interval_for(&self, config: &ProviderConfig) -> Duration {
        let configured = config.sync_interval();
        if configured < self.min_interval {
            self.fallback_interval
        } else {
            configured
        }
    }
}

/// Everything a coordinator needs besides its collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub fetch: FetchPolicy,
    pub fetch_timeout: Duration,
    pub batch_size: usize,
    pub schedule: SchedulePolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            fetch: FetchPolicy::default(),
            fetch_timeout: Duration::from_secs(defaults::FETCH_TIMEOUT_SECS),
            batch_size: defaults::BATCH_SIZE,
            schedule: SchedulePolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SyncRunState {
    in_progress: bool,
    last_completed_at: Option<DateTime<Utc>>,
}

/// Clears `in_progress` and stamps `last_completed_at` when a run ends,
/// including on early return and panic.
struct RunGuard<'a> {
    state: &'a Mutex<SyncRunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_progress = false;
        state.last_completed_at = Some(Utc::now());
    }
}

pub struct SyncCoordinator {
    settings: Arc<dyn ProviderSettings>,
    factory: Arc<dyn ProviderFactory>,
    repository: Arc<dyn SuppressionRepository>,
    options: SyncOptions,
    state: Mutex<SyncRunState>,
}

impl SyncCoordinator {
    pub fn new(
        settings: Arc<dyn ProviderSettings>,
        factory: Arc<dyn ProviderFactory>,
        repository: Arc<dyn SuppressionRepository>,
        options: SyncOptions,
    ) -> Self {
        Self {
            settings,
            factory,
            repository,
            options,
            state: Mutex::new(SyncRunState::default()),
        }
    }

    #[must_use]
    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncRunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state; never waits for a run
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let state = self.lock_state();
        SyncStatus {
            last_completed_at: state.last_completed_at,
            in_progress: state.in_progress,
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = self.lock_state();
        if state.in_progress {
            return None;
        }
        state.in_progress = true;
        Some(RunGuard { state: &self.state })
    }

    /// Runs one synchronization unless one is already in progress.
    pub async fn trigger_sync(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = self.try_begin() else {
            info!("⏭️ Sync already in progress, skipping trigger");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let result = self.run().await;
        match &result {
            Ok(SyncOutcome::Completed(report)) => info!(
                "✅ Sync completed: +{} ~{} -{} ({} withheld, {} shadowed) in {:?}",
                report.added,
                report.updated,
                report.removed,
                report.removals_withheld,
                report.shadowed,
                report.duration
            ),
            Ok(SyncOutcome::Skipped(reason)) => info!("Sync skipped: {:?}", reason),
            Ok(SyncOutcome::AlreadyRunning) => {}
            Err(e) => error!("❌ Sync failed: {}", e),
        }
        result
    }

    /// Fires a run in the background; the single-flight guard coalesces it.
    pub fn spawn_trigger(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            // outcome is already logged by trigger_sync
            let _ = coordinator.trigger_sync().await;
        })
    }

    async fn run(&self) -> Result<SyncOutcome, SyncError> {
        let started = StdInstant::now();
        let config = self.settings.provider_config().await?;

        if !config.enabled {
            info!("Provider integration disabled, skipping sync");
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        }
        if !config.has_credentials() {
            info!("Provider credentials not configured, skipping sync");
            return Ok(SyncOutcome::Skipped(SkipReason::MissingCredentials));
        }

        info!("🔄 Starting suppression sync (region: {})", config.region);

        let provider = self
            .factory
            .build(&config)
            .map_err(SyncError::ProviderUnavailable)?;
        let fetcher = RemoteListFetcher::new(provider, self.options.fetch.clone());
        fetcher
            .check_reachability()
            .await
            .map_err(SyncError::Unreachable)?;

        let deadline = tokio::time::Instant::now() + self.options.fetch_timeout;
        let fetched = fetcher.fetch(deadline).await.map_err(|failure| SyncError::Fetch {
            discarded: failure.accumulated.len(),
            page: failure.page,
            source: failure.error,
        })?;
        info!("Retrieved {} suppressions from provider", fetched.entries.len());

        let snapshot = self.local_snapshot().await?;
        info!("Found {} provider-sourced suppressions locally", snapshot.len());

        let mut plan = plan(&fetched.entries, &snapshot, Utc::now());
        info!(
            "Sync plan: {} to add, {} to update, {} to remove, {} shadowed by manual records",
            plan.to_add.len(),
            plan.to_update.len(),
            plan.to_remove.len(),
            plan.shadowed.len()
        );

        let removals_withheld = if fetched.fully_complete {
            0
        } else {
            let withheld = plan.to_remove.len();
            plan.to_remove.clear();
            if withheld > 0 {
                warn!("⚠️ Fetch incomplete, withholding {} removals", withheld);
            }
            withheld
        };

        let gateway =
            PersistenceGateway::new(Arc::clone(&self.repository), self.options.batch_size);
        let added = gateway.apply_additions(&plan.to_add).await?;
        let updated = gateway.apply_updates(&plan.to_update).await?;
        let removed = gateway.apply_removals(&plan.to_remove).await?;

        let remote_emails = fetched
            .entries
            .iter()
            .map(|entry| entry.email.as_str())
            .collect::<HashSet<_>>()
            .len();
        let expected = plan.expected_provider_count(remote_emails) as u64;
        let local_count = self.verify_counts(expected, fetched.fully_complete).await;

        Ok(SyncOutcome::Completed(SyncReport {
            fetched: fetched.entries.len(),
            pages: fetched.pages,
            fully_complete: fetched.fully_complete,
            added,
            updated,
            removed,
            removals_withheld,
            shadowed: plan.shadowed.len(),
            local_count,
            duration: started.elapsed(),
        }))
    }

    /// Provider-sourced records plus the emails every other source owns
    async fn local_snapshot(&self) -> Result<LocalSnapshot, SyncError> {
        let mut records = self
            .repository
            .find_by_source(SuppressionSource::Provider)
            .await
            .map_err(SyncError::Snapshot)?;
        records.extend(
            self.repository
                .find_by_source(SuppressionSource::Manual)
                .await
                .map_err(SyncError::Snapshot)?,
        );
        Ok(LocalSnapshot::from_records(records))
    }

    /// `remote_count` excludes remote entries shadowed by manual records
    async fn verify_counts(&self, remote_count: u64, fully_complete: bool) -> Option<u64> {
        match self.repository.count_by_source(SuppressionSource::Provider).await {
            Ok(local_count) => {
                if local_count == remote_count {
                    debug!(remote_count, local_count, "Count verification passed");
                } else if fully_complete {
                    warn!(
                        "⚠️ Count mismatch after sync: provider={}, local={}",
                        remote_count, local_count
                    );
                } else {
                    info!(
                        "Partial fetch: provider={} (incomplete), local={}",
                        remote_count, local_count
                    );
                }
                Some(local_count)
            }
            Err(e) => {
                warn!("Failed to read local count for verification: {}", e);
                None
            }
        }
    }

    /// Starts the periodic loop; it stops when `shutdown` is cancelled.
    pub fn start_background_sync(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let schedule = self.options.schedule.clone();
            info!("🕒 Background sync scheduled in {:?}", schedule.startup_delay);

            if !wait_or_cancel(&shutdown, schedule.startup_delay).await {
                info!("Background sync stopped before first run");
                return;
            }
            self.spawn_trigger();

            loop {
                let (wait, trigger) = match self.settings.provider_config().await {
                    Ok(config) if config.enabled => (schedule.interval_for(&config), true),
                    Ok(_) => {
                        debug!("Provider disabled, rechecking in {:?}", schedule.fallback_interval);
                        (schedule.fallback_interval, false)
                    }
                    Err(e) => {
                        warn!("Failed to read provider settings: {}", e);
                        (schedule.fallback_interval, false)
                    }
                };

                if !wait_or_cancel(&shutdown, wait).await {
                    break;
                }
                if trigger {
                    self.spawn_trigger();
                }
            }

            info!("🛑 Background sync stopped");
        })
    }
}

/// Sleeps for `duration`; returns `false` if cancelled first.
async fn wait_or_cancel(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RemoteSuppressionEntry, SuppressionRecord};
    use crate::test_utils::{
        InMemorySuppressionRepository, ScriptedProvider, ScriptedProviderFactory,
        StaticProviderSettings, usable_provider_config,
    };

    fn fast_options() -> SyncOptions {
        SyncOptions {
            fetch: FetchPolicy {
                page_size: 100,
                min_call_delay: Duration::ZERO,
                backoff_step: Duration::from_millis(1),
                backoff_min: Duration::from_millis(1),
                backoff_max: Duration::from_millis(1),
            },
            fetch_timeout: Duration::from_secs(10),
            batch_size: 100,
            schedule: SchedulePolicy {
                startup_delay: Duration::from_millis(10),
                fallback_interval: Duration::from_millis(50),
                min_interval: Duration::from_millis(20),
            },
        }
    }

    fn coordinator(
        config: ProviderConfig,
        provider: Arc<ScriptedProvider>,
        repo: Arc<InMemorySuppressionRepository>,
    ) -> SyncCoordinator {
        SyncCoordinator::new(
            Arc::new(StaticProviderSettings::new(config)),
            Arc::new(ScriptedProviderFactory::new(provider)),
            repo,
            fast_options(),
        )
    }

    #[test]
    fn short_intervals_fall_back() {
        let schedule = SchedulePolicy::default();
        let mut config = usable_provider_config();

        config.sync_interval_minutes = 0;
        assert_eq!(schedule.interval_for(&config), Duration::from_secs(300));

        config.sync_interval_minutes = 1;
        assert_eq!(schedule.interval_for(&config), Duration::from_secs(60));

        config.sync_interval_minutes = 30;
        assert_eq!(schedule.interval_for(&config), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn disabled_provider_skips_but_stamps_completion() {
        let provider = Arc::new(ScriptedProvider::new());
        let repo = Arc::new(InMemorySuppressionRepository::new());
        let config = ProviderConfig {
            enabled: false,
            ..usable_provider_config()
        };
        let coordinator = coordinator(config, provider.clone(), repo);

        let outcome = coordinator.trigger_sync().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::Disabled));
        assert_eq!(provider.total_calls(), 0);
        let status = coordinator.status();
        assert!(!status.in_progress);
        assert!(status.last_completed_at.is_some());
    }

    #[tokio::test]
    async fn missing_credentials_skip() {
        let config = ProviderConfig {
            secret_key: String::new(),
            ..usable_provider_config()
        };
        let coordinator = coordinator(
            config,
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemorySuppressionRepository::new()),
        );

        let outcome = coordinator.trigger_sync().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::MissingCredentials));
    }

    #[tokio::test]
    async fn unreachable_provider_aborts_before_any_change() {
        let provider = Arc::new(ScriptedProvider::new().fail_check_account());
        let now = Utc::now();
        let repo = Arc::new(InMemorySuppressionRepository::with_records([SuppressionRecord::new(
            "a@x.io",
            "BOUNCE",
            SuppressionSource::Provider,
            now,
        )]));
        let coordinator = coordinator(usable_provider_config(), provider.clone(), repo.clone());

        let err = coordinator.trigger_sync().await.unwrap_err();

        assert!(matches!(err, SyncError::Unreachable(_)));
        assert_eq!(provider.list_calls(), 0);
        assert_eq!(repo.len(), 1);
        assert!(coordinator.status().last_completed_at.is_some());
    }

    #[tokio::test]
    async fn page_failure_discards_partial_fetch() {
        let provider = Arc::new(
            ScriptedProvider::with_remote_list(
                (0..250).map(|i| RemoteSuppressionEntry::new(format!("u{i}@x.io"), "BOUNCE")),
            )
            .fail_list_page_at(2),
        );
        let repo = Arc::new(InMemorySuppressionRepository::new());
        let coordinator = coordinator(usable_provider_config(), provider, repo.clone());

        let err = coordinator.trigger_sync().await.unwrap_err();

        match err {
            SyncError::Fetch { page, discarded, .. } => {
                assert_eq!(page, 2);
                assert_eq!(discarded, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn status_reports_in_progress_during_a_run() {
        let provider = Arc::new(
            ScriptedProvider::with_remote_list([RemoteSuppressionEntry::new("a@x.io", "BOUNCE")])
                .with_list_latency(Duration::from_millis(200)),
        );
        let coordinator = Arc::new(coordinator(
            usable_provider_config(),
            provider,
            Arc::new(InMemorySuppressionRepository::new()),
        ));

        let handle = coordinator.spawn_trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.status().in_progress);

        handle.await.unwrap();
        let status = coordinator.status();
        assert!(!status.in_progress);
        assert!(status.last_completed_at.is_some());
    }

    #[tokio::test]
    async fn background_loop_stops_on_cancellation() {
        let provider = Arc::new(ScriptedProvider::new());
        let coordinator = Arc::new(coordinator(
            usable_provider_config(),
            provider.clone(),
            Arc::new(InMemorySuppressionRepository::new()),
        ));
        let shutdown = CancellationToken::new();

        let handle = Arc::clone(&coordinator).start_background_sync(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(provider.list_calls() >= 1);
    }

    #[tokio::test]
    async fn background_loop_does_not_trigger_while_disabled() {
        let provider = Arc::new(ScriptedProvider::new());
        let settings = Arc::new(StaticProviderSettings::new(ProviderConfig {
            enabled: false,
            ..usable_provider_config()
        }));
        let coordinator = Arc::new(SyncCoordinator::new(
            settings,
            Arc::new(ScriptedProviderFactory::new(provider.clone())),
            Arc::new(InMemorySuppressionRepository::new()),
            fast_options(),
        ));
        let shutdown = CancellationToken::new();

        let handle = Arc::clone(&coordinator).start_background_sync(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(provider.total_calls(), 0);
        // the startup run still counts as checked
        assert!(coordinator.status().last_completed_at.is_some());
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::db::codec::{favourite_from_fields, favourite_to_fields};
use crate::db::{Cursor, RowStore, Scope, SqliteStore, Table};
use crate::error::Result;
use crate::feed::{SampleFetcher, SampleSource};
use crate::models::{FavouriteEntry, ScheduledEntry};
use crate::scheduler::{
    PendingStateManager, ScheduleRegistry, Tick, TokioTriggerFacility, TriggerController,
    LEASE_HEARTBEAT,
};

/// Outcome of one pass over the scheduled entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub refreshed: usize,
    pub failed: usize,
}

pub struct App<Src = SampleFetcher> {
    pub registry: ScheduleRegistry<SqliteStore>,
    pub pending: PendingStateManager<SqliteStore>,
    pub trigger: TriggerController<SqliteStore, TokioTriggerFacility>,
    store: Arc<SqliteStore>,
    ticks: mpsc::Receiver<Tick>,
    source: Src,
    max_concurrent_fetches: usize,
}

impl App<SampleFetcher> {
    pub async fn new(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.db_path).await?);
        let source = SampleFetcher::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;

        Ok(Self::with_parts(
            Arc::clone(&store),
            Arc::new(TokioTriggerFacility::new(Arc::clone(&store))),
            source,
            config.max_concurrent_fetches,
        ))
    }
}

impl<Src: SampleSource> App<Src> {
    pub fn with_parts(
        store: Arc<SqliteStore>,
        facility: Arc<TokioTriggerFacility>,
        source: Src,
        max_concurrent_fetches: usize,
    ) -> Self {
        // Capacity 1: a tick that arrives while one is queued is coalesced
        let (tick_tx, ticks) = mpsc::channel(1);
        let registry = ScheduleRegistry::new(Arc::clone(&store));

        Self {
            pending: PendingStateManager::new(Arc::clone(&store)),
            trigger: TriggerController::new(facility, registry.clone(), tick_tx),
            registry,
            store,
            ticks,
            source,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    pub async fn add_entry(&self, entry: ScheduledEntry) -> Result<()> {
        self.registry.add(&entry).await?;
        self.trigger.start().await?;
        Ok(())
    }

    pub async fn remove_entry(&self, entry_id: i64) -> Result<bool> {
        let removed = self.registry.remove(entry_id).await?;
        self.trigger.stop_if_idle().await;
        Ok(removed)
    }

    pub async fn entries(&self) -> Result<Vec<ScheduledEntry>> {
        Ok(self.registry.list_all().collect_all().await?)
    }

    /// Pin a feed as a favourite. Favourites are never created by the
    /// scheduler itself; this is the user-facing side.
    pub async fn pin_favourite(&self, favourite: &FavouriteEntry) -> Result<()> {
        let fields = favourite_to_fields(favourite)?;
        self.store.insert(Table::FavouriteEntries, fields).await?;
        Ok(())
    }

    pub async fn favourites(&self) -> Result<Vec<FavouriteEntry>> {
        let cursor = Cursor::new(
            Arc::clone(&self.store),
            Scope::All(Table::FavouriteEntries),
            favourite_from_fields,
        );
        Ok(cursor.collect_all().await?)
    }

    pub async fn reconcile(&self) -> Result<u64> {
        Ok(self.pending.reconcile().await?)
    }

    /// Refresh every scheduled entry once, then let the trigger stop if the
    /// registry has emptied in the meantime.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let entries = self.registry.list_all().collect_all().await?;
        tracing::debug!("Sync cycle over {} entries", entries.len());

        let outcomes: Vec<bool> = stream::iter(entries)
            .map(|entry| self.refresh_entry(entry))
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        let refreshed = outcomes.iter().filter(|ok| **ok).count();
        let report = CycleReport {
            refreshed,
            failed: outcomes.len() - refreshed,
        };

        match self.registry.count_pending().await {
            Ok(0) => {}
            Ok(left) => tracing::warn!("{} entries still pending after cycle", left),
            Err(e) => tracing::warn!("Could not count pending entries: {}", e),
        }

        self.trigger.stop_if_idle().await;
        Ok(report)
    }

    /// Reconcile and run one cycle, unless another process hosts the
    /// trigger and is already refreshing the same entries.
    pub async fn run_once(&self) -> Result<Option<CycleReport>> {
        if self.trigger.is_running().await && !self.trigger.is_hosted_here().await {
            tracing::info!("Trigger {} is hosted elsewhere, skipping", self.trigger.trigger_id());
            return Ok(None);
        }

        self.reconcile().await?;
        Ok(Some(self.run_cycle().await?))
    }

    /// Process trigger firings until Ctrl-C or until the trigger is cancelled.
    ///
    /// Returns straight away when nothing is scheduled or when another
    /// process already hosts the trigger.
    pub async fn run(&mut self) -> Result<()> {
        if self.registry.count_all().await? == 0 {
            tracing::info!("Nothing scheduled, not starting trigger");
            return Ok(());
        }

        let handle = self.trigger.start().await?;
        if !self.trigger.is_local(&handle) {
            tracing::info!("Trigger {} is hosted by {}, exiting", handle.id, handle.owner);
            return Ok(());
        }

        self.reconcile().await?;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut liveness = tokio::time::interval(LEASE_HEARTBEAT);

        loop {
            tokio::select! {
                tick = self.ticks.recv() => {
                    let Some(tick) = tick else { break };
                    tracing::debug!("Trigger {} fired at {}", tick.trigger, tick.fired_at);

                    match self.run_cycle().await {
                        Ok(report) => tracing::info!(
                            "Refreshed {} entries, {} failed",
                            report.refreshed,
                            report.failed
                        ),
                        Err(e) => tracing::warn!("Sync cycle failed: {}", e),
                    }

                    if !self.trigger.is_hosted_here().await {
                        tracing::info!("Trigger {} stopped, exiting", self.trigger.trigger_id());
                        break;
                    }
                }
                _ = liveness.tick() => {
                    if !self.trigger.is_hosted_here().await {
                        tracing::info!("Trigger {} no longer hosted here, exiting", self.trigger.trigger_id());
                        break;
                    }
                }
                signal = &mut ctrl_c => {
                    if let Err(e) = signal {
                        tracing::warn!("Could not listen for Ctrl-C: {}", e);
                    }
                    tracing::info!("Interrupted, exiting");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Release the trigger if this process hosts it.
    pub async fn shutdown(&self) {
        self.trigger.stop().await;
    }

    async fn refresh_entry(&self, mut entry: ScheduledEntry) -> bool {
        if let Err(e) = self.pending.mark_pending(&mut entry).await {
            tracing::warn!("Could not mark {} pending: {}", entry.feed_id, e);
            return false;
        }

        let fetched = match self.source.latest_sample(&entry.feed_id).await {
            Ok(Some(sample)) => {
                entry.sample = Some(sample);
                true
            }
            Ok(None) => {
                tracing::debug!("Feed {} has no samples yet", entry.feed_id);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", entry.feed_id, e);
                false
            }
        };

        // Cleared even after a failed fetch so the flag never sticks
        match self.pending.clear_pending(&mut entry).await {
            Ok(_) => fetched,
            Err(e) => {
                tracing::warn!("Could not clear pending on {}: {}", entry.feed_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::error::AppError;
    use crate::models::Sample;

    #[derive(Default)]
    struct FakeSource {
        samples: HashMap<String, Sample>,
        failing: Vec<String>,
    }

    impl SampleSource for FakeSource {
        async fn latest_sample(&self, feed_id: &str) -> Result<Option<Sample>> {
            if self.failing.iter().any(|f| f == feed_id) {
                return Err(AppError::SensableApi(format!("{feed_id} unreachable")));
            }
            Ok(self.samples.get(feed_id).cloned())
        }
    }

    fn reading(value: f64) -> Sample {
        Sample::new(value, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    }

    fn with_store(store: SqliteStore, source: FakeSource) -> App<FakeSource> {
        let store = Arc::new(store);
        let facility = Arc::new(TokioTriggerFacility::new(Arc::clone(&store)));
        App::with_parts(store, facility, source, 2)
    }

    async fn app(source: FakeSource) -> App<FakeSource> {
        let store = SqliteStore::open_in_memory()
            .await
            .expect("in-memory store must open");
        with_store(store, source)
    }

    /// Two apps on one database file, as two processes would be.
    async fn two_processes() -> (TempDir, App<FakeSource>, App<FakeSource>) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("sensable.db");
        let path = path.to_str().expect("utf-8 path");
        let first = SqliteStore::open(path).await.expect("open first");
        let second = SqliteStore::open(path).await.expect("open second");
        (
            dir,
            with_store(first, FakeSource::default()),
            with_store(second, FakeSource::default()),
        )
    }

    fn favourite(feed_id: &str) -> FavouriteEntry {
        FavouriteEntry {
            feed_id: feed_id.to_string(),
            name: "Pinned".to_string(),
            unit: "°C".to_string(),
            sample: None,
        }
    }

    #[tokio::test]
    async fn schedule_refresh_and_unschedule_a_feed() {
        let app = app(FakeSource::default()).await;
        app.pin_favourite(&favourite("temp-1")).await.expect("pin");

        app.add_entry(ScheduledEntry::new("temp-1"))
            .await
            .expect("add");
        assert_eq!(app.registry.count_all().await.expect("count"), 1);
        assert!(app.trigger.is_running().await);

        let mut entry = app.entries().await.expect("list").remove(0);
        app.pending.mark_pending(&mut entry).await.expect("mark");
        assert_eq!(app.registry.count_pending().await.expect("count"), 1);

        entry.sample = Some(reading(21.5));
        app.pending.update(&entry).await.expect("update");
        assert_eq!(app.entries().await.expect("list")[0].sample, Some(reading(21.5)));
        assert_eq!(app.favourites().await.expect("favourites")[0].sample, Some(reading(21.5)));

        let id = entry.id.expect("stored entry has id");
        assert!(app.remove_entry(id).await.expect("remove"));
        assert_eq!(app.registry.count_all().await.expect("count"), 0);
        assert!(app.trigger.stop_if_idle().await);
        assert!(!app.trigger.is_running().await);
    }

    #[tokio::test]
    async fn cycle_refreshes_entries_and_leaves_nothing_pending() {
        let source = FakeSource {
            samples: HashMap::from([("temp-1".to_string(), reading(21.5))]),
            failing: vec!["temp-2".to_string()],
        };
        let app = app(source).await;
        app.pin_favourite(&favourite("temp-1")).await.expect("pin");
        app.add_entry(ScheduledEntry::new("temp-1")).await.expect("add");
        app.add_entry(ScheduledEntry::new("temp-2")).await.expect("add");
        app.add_entry(ScheduledEntry::new("temp-3")).await.expect("add");

        let report = app.run_cycle().await.expect("cycle");
        let entries = app.entries().await.expect("list");

        assert_eq!(report, CycleReport { refreshed: 2, failed: 1 });
        assert_eq!(app.registry.count_pending().await.expect("count"), 0);
        assert_eq!(entries[0].sample, Some(reading(21.5)));
        assert_eq!(entries[1].sample, None);
        assert_eq!(app.favourites().await.expect("favourites")[0].sample, Some(reading(21.5)));
        assert!(app.trigger.is_running().await);
    }

    #[tokio::test]
    async fn cycle_on_empty_registry_stops_trigger() {
        let app = app(FakeSource::default()).await;
        app.add_entry(ScheduledEntry::new("temp-1")).await.expect("add");
        let id = app.entries().await.expect("list")[0].id.expect("id");
        app.registry.remove(id).await.expect("remove");

        let report = app.run_cycle().await.expect("cycle");

        assert_eq!(report, CycleReport::default());
        assert!(!app.trigger.is_running().await);
    }

    #[tokio::test]
    async fn run_with_nothing_scheduled_returns_immediately() {
        let mut app = app(FakeSource::default()).await;

        app.run().await.expect("run");

        assert!(!app.trigger.is_running().await);
    }

    #[tokio::test]
    async fn second_process_defers_to_hosted_trigger() {
        let (_dir, host, mut other) = two_processes().await;
        host.add_entry(ScheduledEntry::new("temp-1")).await.expect("add");
        let mut entry = host.entries().await.expect("list").remove(0);
        host.pending.mark_pending(&mut entry).await.expect("mark");

        // Returns at once instead of hosting a second trigger
        other.run().await.expect("run");

        assert!(host.trigger.is_hosted_here().await);
        assert!(other.trigger.is_running().await);
        assert!(!other.trigger.is_hosted_here().await);
        // The host's in-flight flag is not the other process's to clear
        assert_eq!(host.registry.count_pending().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn run_once_skips_while_another_process_hosts_the_trigger() {
        let (_dir, host, other) = two_processes().await;
        host.add_entry(ScheduledEntry::new("temp-1")).await.expect("add");

        assert_eq!(other.run_once().await.expect("run once"), None);

        host.shutdown().await;
        assert_eq!(
            other.run_once().await.expect("run once"),
            Some(CycleReport { refreshed: 1, failed: 0 })
        );
    }
}

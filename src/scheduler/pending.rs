use std::sync::Arc;

use crate::db::codec::scheduled_to_fields;
use crate::db::{RowStore, Scope, StoreError};
use crate::models::ScheduledEntry;

use super::{FavouritePropagator, ScheduleRegistry};

const RECONCILE_PASSES: u32 = 2;

/// Owns the pending flag of scheduled entries.
///
/// Every write of a scheduled entry goes through [`update`](Self::update),
/// which also gives the favourites for the same feed a chance to refresh.
pub struct PendingStateManager<S> {
    store: Arc<S>,
    registry: ScheduleRegistry<S>,
    propagator: FavouritePropagator<S>,
}

impl<S: RowStore> PendingStateManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            registry: ScheduleRegistry::new(Arc::clone(&store)),
            propagator: FavouritePropagator::new(Arc::clone(&store)),
            store,
        }
    }

    pub async fn mark_pending(&self, entry: &mut ScheduledEntry) -> Result<bool, StoreError> {
        entry.pending = true;
        self.update(entry).await
    }

    pub async fn clear_pending(&self, entry: &mut ScheduledEntry) -> Result<bool, StoreError> {
        entry.pending = false;
        self.update(entry).await
    }

    /// Write `entry` by id, then propagate its sample to favourites.
    ///
    /// Propagation runs even when the scheduled row was not updated or the
    /// write failed. Its outcome is logged and discarded; the return value
    /// reflects the scheduled row only.
    pub async fn update(&self, entry: &ScheduledEntry) -> Result<bool, StoreError> {
        let updated = self.write_scheduled(entry).await;

        match self.propagator.propagate_if_favourited(entry).await {
            Ok(propagated) => {
                tracing::debug!("Propagation for {}: {}", entry.feed_id, propagated);
            }
            Err(e) => {
                tracing::warn!("Failed to propagate sample of {}: {}", entry.feed_id, e);
            }
        }

        updated
    }

    /// Clear pending flags left behind by a previous process. Returns the
    /// number of entries cleared.
    ///
    /// An entry that cannot be cleared is logged and skipped; the pending
    /// view is walked once more to retry whatever is still flagged.
    pub async fn reconcile(&self) -> Result<u64, StoreError> {
        let mut cursor = self.registry.list_pending();
        let mut cleared = 0;

        for pass in 1..=RECONCILE_PASSES {
            let mut failed = 0;
            while let Some(entry) = cursor.next().await {
                let mut entry = entry?;
                match self.clear_pending(&mut entry).await {
                    Ok(true) => cleared += 1,
                    Ok(false) => {}
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(
                            "Could not clear stale pending flag on {} (pass {}): {}",
                            entry.feed_id,
                            pass,
                            e
                        );
                    }
                }
            }

            if failed == 0 || pass == RECONCILE_PASSES {
                break;
            }
            cursor.rewind();
        }

        if cleared > 0 {
            tracing::info!("Cleared {} stale pending flag(s)", cleared);
        }
        Ok(cleared)
    }

    async fn write_scheduled(&self, entry: &ScheduledEntry) -> Result<bool, StoreError> {
        let Some(id) = entry.id else {
            tracing::debug!("Entry for {} has no row id, nothing to update", entry.feed_id);
            return Ok(false);
        };

        let fields = scheduled_to_fields(entry)?;
        let rows_updated = self.store.update(&Scope::ScheduledById(id), fields).await?;
        Ok(rows_updated > 0)
    }
}

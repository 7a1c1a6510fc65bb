use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::db::RowStore;

use super::timer::{Tick, TriggerError, TriggerFacility, TriggerHandle, TriggerId};
use super::ScheduleRegistry;

pub const TRIGGER_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const TRIGGER_ID: &str = "sensable-sync";

/// Keeps exactly one recurring trigger alive while there is something to
/// refresh.
pub struct TriggerController<S, F> {
    facility: Arc<F>,
    registry: ScheduleRegistry<S>,
    id: TriggerId,
    target: mpsc::Sender<Tick>,
}

impl<S: RowStore, F: TriggerFacility> TriggerController<S, F> {
    pub fn new(facility: Arc<F>, registry: ScheduleRegistry<S>, target: mpsc::Sender<Tick>) -> Self {
        Self {
            facility,
            registry,
            id: TriggerId::new(TRIGGER_ID),
            target,
        }
    }

    pub fn trigger_id(&self) -> &TriggerId {
        &self.id
    }

    /// Whether `handle` is hosted by this process.
    pub fn is_local(&self, handle: &TriggerHandle) -> bool {
        handle.owner == self.facility.owner()
    }

    /// Whether a trigger is live anywhere, in this process or another one
    /// sharing the database.
    pub async fn is_running(&self) -> bool {
        self.current().await.is_some()
    }

    pub async fn is_hosted_here(&self) -> bool {
        self.current()
            .await
            .is_some_and(|handle| self.is_local(&handle))
    }

    /// Register the trigger unless one is already live under the same id,
    /// here or in another process. Returns the live handle either way.
    pub async fn start(&self) -> Result<TriggerHandle, TriggerError> {
        if let Some(handle) = self.facility.lookup(&self.id).await? {
            tracing::debug!("Trigger {} already running under {}", self.id, handle.owner);
            return Ok(handle);
        }

        let handle = self
            .facility
            .register(&self.id, TRIGGER_INTERVAL, self.target.clone())
            .await?;
        tracing::info!(
            "Trigger {} registered every {} minutes (generation {})",
            handle.id,
            TRIGGER_INTERVAL.as_secs() / 60,
            handle.generation
        );
        Ok(handle)
    }

    /// Cancel the trigger when nothing is scheduled. Always returns `true`.
    ///
    /// A trigger hosted by another process is left running; its host stops
    /// it after its next cycle finds the registry empty.
    pub async fn stop_if_idle(&self) -> bool {
        match self.registry.count_all().await {
            Ok(0) => {
                if let Some(handle) = self.current().await {
                    self.cancel(&handle, "nothing scheduled").await;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Could not count scheduled entries, keeping trigger: {}", e);
            }
        }
        true
    }

    /// Cancel the trigger if this process hosts it.
    pub async fn stop(&self) {
        if let Some(handle) = self.current().await {
            self.cancel(&handle, "shutting down").await;
        }
    }

    async fn cancel(&self, handle: &TriggerHandle, reason: &str) {
        match self.facility.cancel(handle).await {
            Ok(()) if self.is_local(handle) => {
                tracing::info!("Trigger {} cancelled: {}", self.id, reason);
            }
            Ok(()) => {}
            Err(e) => tracing::warn!("Could not cancel trigger {}: {}", self.id, e),
        }
    }

    async fn current(&self) -> Option<TriggerHandle> {
        match self.facility.lookup(&self.id).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Could not look up trigger {}: {}", self.id, e);
                None
            }
        }
    }
}

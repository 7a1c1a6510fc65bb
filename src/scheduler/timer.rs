//! Recurring trigger facility.
//!
//! Triggers are keyed by a well-known [`TriggerId`] so a caller can ask
//! whether one is already registered before creating another. The Tokio
//! facility records each trigger it hosts as a lease row in the database,
//! which makes a trigger hosted by one process visible to every other
//! process opened on the same file.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::db::{Lease, SqliteStore, StoreError};

/// How often a hosted trigger refreshes its lease.
pub const LEASE_HEARTBEAT: Duration = Duration::from_secs(30);

/// A lease not refreshed for this long belongs to a process that is gone.
pub const LEASE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("no async runtime available to host trigger `{0}`")]
    NoRuntime(TriggerId),

    #[error("trigger `{id}` is already hosted by {owner}")]
    HostedElsewhere { id: TriggerId, owner: String },

    #[error("trigger lease unavailable: {0}")]
    Lease(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered trigger. `owner` names the facility hosting it, which may
/// live in another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerHandle {
    pub id: TriggerId,
    pub owner: String,
    pub generation: u64,
}

impl TriggerHandle {
    fn lease(&self) -> Lease {
        Lease {
            trigger_id: self.id.to_string(),
            owner: self.owner.clone(),
            generation: self.generation,
        }
    }
}

impl From<Lease> for TriggerHandle {
    fn from(lease: Lease) -> Self {
        Self {
            id: TriggerId(lease.trigger_id),
            owner: lease.owner,
            generation: lease.generation,
        }
    }
}

/// One firing of a trigger.
#[derive(Debug, Clone)]
pub struct Tick {
    pub trigger: TriggerId,
    pub fired_at: DateTime<Utc>,
}

#[allow(async_fn_in_trait)]
pub trait TriggerFacility {
    /// Owner recorded in the handles this facility registers.
    fn owner(&self) -> &str;

    /// Register a recurring trigger. Firings are delivered to `target`.
    async fn register(
        &self,
        id: &TriggerId,
        interval: Duration,
        target: mpsc::Sender<Tick>,
    ) -> Result<TriggerHandle, TriggerError>;

    /// Look up a live trigger, hosted here or elsewhere, without creating
    /// one.
    async fn lookup(&self, id: &TriggerId) -> Result<Option<TriggerHandle>, TriggerError>;

    /// Cancel a trigger this facility hosts. Handles owned elsewhere are
    /// left to their host.
    async fn cancel(&self, handle: &TriggerHandle) -> Result<(), TriggerError>;
}

struct Registration {
    handle: TriggerHandle,
    ticker: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Registration {
    fn stop(&self) {
        self.ticker.abort();
        self.heartbeat.abort();
    }
}

static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Runs each trigger as a `tokio::time::interval` task, with a second task
/// keeping its lease fresh.
///
/// Firing is best-effort: missed ticks are skipped, and a tick is dropped
/// when the receiver still holds an unprocessed one.
pub struct TokioTriggerFacility {
    leases: Arc<SqliteStore>,
    owner: String,
    registrations: Mutex<HashMap<TriggerId, Registration>>,
    generation: AtomicU64,
}

impl TokioTriggerFacility {
    pub fn new(leases: Arc<SqliteStore>) -> Self {
        let owner = format!(
            "pid{}-{}",
            std::process::id(),
            INSTANCES.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            leases,
            owner,
            registrations: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<TriggerId, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TriggerFacility for TokioTriggerFacility {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn register(
        &self,
        id: &TriggerId,
        interval: Duration,
        target: mpsc::Sender<Tick>,
    ) -> Result<TriggerHandle, TriggerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TriggerError::NoRuntime(id.clone()))?;

        let handle = TriggerHandle {
            id: id.clone(),
            owner: self.owner.clone(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let lease = handle.lease();

        if !self.leases.acquire_lease(&lease, Utc::now(), LEASE_TTL).await? {
            let owner = self
                .leases
                .live_lease(id.as_str(), Utc::now(), LEASE_TTL)
                .await?
                .map(|holder| holder.owner)
                .unwrap_or_default();
            return Err(TriggerError::HostedElsewhere {
                id: id.clone(),
                owner,
            });
        }

        let ticker = runtime.spawn(run_ticker(id.clone(), interval, target));
        let heartbeat = runtime.spawn(keep_alive(
            Arc::clone(&self.leases),
            lease,
            ticker.abort_handle(),
        ));

        let previous = self.registrations().insert(
            id.clone(),
            Registration {
                handle: handle.clone(),
                ticker,
                heartbeat,
            },
        );
        if let Some(previous) = previous {
            previous.stop();
        }

        Ok(handle)
    }

    async fn lookup(&self, id: &TriggerId) -> Result<Option<TriggerHandle>, TriggerError> {
        let finished = {
            let mut registrations = self.registrations();
            let local = registrations
                .get(id)
                .map(|r| (r.handle.clone(), r.ticker.is_finished()));
            match local {
                Some((handle, false)) => return Ok(Some(handle)),
                Some((_, true)) => registrations.remove(id),
                None => None,
            }
        };

        // A trigger whose target went away or whose lease was lost is no
        // longer registered.
        if let Some(registration) = finished {
            registration.stop();
            if let Err(e) = self.leases.release_lease(&registration.handle.lease()).await {
                tracing::warn!("Could not release lease of trigger {}: {}", id, e);
            }
        }

        let live = self
            .leases
            .live_lease(id.as_str(), Utc::now(), LEASE_TTL)
            .await?;
        Ok(live.map(TriggerHandle::from))
    }

    async fn cancel(&self, handle: &TriggerHandle) -> Result<(), TriggerError> {
        let registration = {
            let mut registrations = self.registrations();
            if registrations
                .get(&handle.id)
                .is_some_and(|r| r.handle == *handle)
            {
                registrations.remove(&handle.id)
            } else {
                None
            }
        };

        match registration {
            Some(registration) => {
                registration.stop();
                self.leases.release_lease(&handle.lease()).await?;
            }
            None if handle.owner != self.owner => {
                tracing::debug!(
                    "Trigger {} is hosted by {}, leaving it to its host",
                    handle.id,
                    handle.owner
                );
            }
            None => {}
        }
        Ok(())
    }
}

impl Drop for TokioTriggerFacility {
    fn drop(&mut self) {
        let registrations = self
            .registrations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, registration) in registrations.drain() {
            registration.stop();
        }
    }
}

/// Deliver a [`Tick`] every `interval`, starting immediately, until the
/// target closes.
async fn run_ticker(trigger: TriggerId, interval: Duration, target: mpsc::Sender<Tick>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let tick = Tick {
            trigger: trigger.clone(),
            fired_at: Utc::now(),
        };
        match target.try_send(tick) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Trigger {} coalesced: previous tick unprocessed", trigger);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Trigger {} target closed, stopping", trigger);
                return;
            }
        }
    }
}

/// Refresh `lease` until the ticker ends or the lease is taken over.
async fn keep_alive(leases: Arc<SqliteStore>, lease: Lease, ticker: AbortHandle) {
    let mut heartbeat = tokio::time::interval(LEASE_HEARTBEAT);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        heartbeat.tick().await;

        if ticker.is_finished() {
            if let Err(e) = leases.release_lease(&lease).await {
                tracing::warn!("Could not release lease of trigger {}: {}", lease.trigger_id, e);
            }
            return;
        }

        match leases.renew_lease(&lease, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Trigger {} lost its lease, stopping", lease.trigger_id);
                ticker.abort();
                return;
            }
            Err(e) => {
                tracing::warn!("Could not renew lease of trigger {}: {}", lease.trigger_id, e);
            }
        }
    }
}

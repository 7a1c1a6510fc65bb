//! Trigger leases.
//!
//! A lease row says which process hosts a trigger. The holder refreshes
//! `heartbeat_at` while it runs; a row whose heartbeat is older than the
//! ttl belongs to a process that is gone and may be taken over.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::repository::SqliteStore;
use super::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub trigger_id: String,
    pub owner: String,
    pub generation: u64,
}

fn stale_before(now: DateTime<Utc>, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_sub(ttl_ms)
}

impl SqliteStore {
    /// Take `lease` unless a live lease for the same trigger is held by
    /// another owner. Returns whether the lease is now held.
    pub async fn acquire_lease(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let lease = lease.clone();
        let cutoff = stale_before(now, ttl);
        let now = now.timestamp_millis();

        let taken = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO trigger_leases (trigger_id, owner, generation, heartbeat_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(trigger_id) DO UPDATE SET
                        owner = excluded.owner,
                        generation = excluded.generation,
                        heartbeat_at = excluded.heartbeat_at
                     WHERE trigger_leases.owner = excluded.owner
                        OR trigger_leases.heartbeat_at < ?5",
                    params![lease.trigger_id, lease.owner, lease.generation as i64, now, cutoff],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(taken > 0)
    }

    /// Refresh the heartbeat. `false` means the lease was taken over or
    /// released.
    pub async fn renew_lease(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let lease = lease.clone();
        let now = now.timestamp_millis();

        let renewed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE trigger_leases SET heartbeat_at = ?4
                     WHERE trigger_id = ?1 AND owner = ?2 AND generation = ?3",
                    params![lease.trigger_id, lease.owner, lease.generation as i64, now],
                )?)
            })
            .await?;
        Ok(renewed > 0)
    }

    pub async fn release_lease(&self, lease: &Lease) -> Result<bool, StoreError> {
        let lease = lease.clone();

        let released = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM trigger_leases
                     WHERE trigger_id = ?1 AND owner = ?2 AND generation = ?3",
                    params![lease.trigger_id, lease.owner, lease.generation as i64],
                )?)
            })
            .await?;
        Ok(released > 0)
    }

    /// The lease currently hosting `trigger_id`, ignoring stale rows.
    pub async fn live_lease(
        &self,
        trigger_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        let trigger_id = trigger_id.to_string();
        let cutoff = stale_before(now, ttl);

        let lease = self
            .conn
            .call(move |conn| {
                let lease = conn
                    .query_row(
                        "SELECT trigger_id, owner, generation FROM trigger_leases
                         WHERE trigger_id = ?1 AND heartbeat_at >= ?2",
                        params![trigger_id, cutoff],
                        |row| {
                            Ok(Lease {
                                trigger_id: row.get(0)?,
                                owner: row.get(1)?,
                                generation: row.get::<_, i64>(2)? as u64,
                            })
                        },
                    )
                    .optional()?;
                Ok(lease)
            })
            .await?;
        Ok(lease)
    }
}

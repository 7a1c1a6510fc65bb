use std::sync::Arc;

use crate::db::codec::{scheduled_from_fields, scheduled_to_fields};
use crate::db::{Cursor, RowStore, Scope, StoreError, Table};
use crate::models::ScheduledEntry;

/// CRUD over `scheduled_entries`.
pub struct ScheduleRegistry<S> {
    store: Arc<S>,
}

impl<S> Clone for ScheduleRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RowStore> ScheduleRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Insert an entry. The same feed may be scheduled more than once.
    pub async fn add(&self, entry: &ScheduledEntry) -> Result<(), StoreError> {
        let fields = scheduled_to_fields(entry)?;
        let id = self.store.insert(Table::ScheduledEntries, fields).await?;
        tracing::debug!("Scheduled feed {} as entry {}", entry.feed_id, id);
        Ok(())
    }

    pub async fn remove(&self, entry_id: i64) -> Result<bool, StoreError> {
        let removed = self.store.delete(&Scope::ScheduledById(entry_id)).await?;
        Ok(removed > 0)
    }

    pub fn list_all(&self) -> Cursor<S, ScheduledEntry> {
        Cursor::new(
            Arc::clone(&self.store),
            Scope::All(Table::ScheduledEntries),
            scheduled_from_fields,
        )
    }

    pub fn list_pending(&self) -> Cursor<S, ScheduledEntry> {
        Cursor::new(Arc::clone(&self.store), Scope::Pending, scheduled_from_fields)
    }

    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.store.count(&Scope::All(Table::ScheduledEntries)).await
    }

    pub async fn count_pending(&self) -> Result<u64, StoreError> {
        self.store.count(&Scope::Pending).await
    }
}

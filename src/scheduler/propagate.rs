use std::sync::Arc;

use crate::db::codec::favourite_sample_fields;
use crate::db::{RowStore, Scope, StoreError};
use crate::models::ScheduledEntry;

/// Copies a scheduled entry's sample onto the favourites pinned for the same
/// feed.
pub struct FavouritePropagator<S> {
    store: Arc<S>,
}

impl<S> Clone for FavouritePropagator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RowStore> FavouritePropagator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns `false` without writing when the feed is not favourited.
    /// Otherwise every favourite row for the feed receives the sample.
    pub async fn propagate_if_favourited(&self, entry: &ScheduledEntry) -> Result<bool, StoreError> {
        let scope = Scope::FavouriteByFeed(entry.feed_id.clone());

        if self.store.count(&scope).await? == 0 {
            return Ok(false);
        }

        let fields = favourite_sample_fields(&entry.feed_id, entry.sample.as_ref())?;
        let updated = self.store.update(&scope, fields).await?;
        tracing::debug!("Copied sample of {} to {} favourite(s)", entry.feed_id, updated);
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::codec::{favourite_from_fields, favourite_to_fields};
    use crate::db::{Cursor, SqliteStore, Table};
    use crate::models::{FavouriteEntry, Sample};

    async fn store() -> Arc<SqliteStore> {
        Arc::new(
            SqliteStore::open_in_memory()
                .await
                .expect("in-memory store must open"),
        )
    }

    async fn pin(store: &SqliteStore, feed_id: &str, name: &str) {
        let favourite = FavouriteEntry {
            feed_id: feed_id.to_string(),
            name: name.to_string(),
            unit: "°C".to_string(),
            sample: None,
        };
        store
            .insert(
                Table::FavouriteEntries,
                favourite_to_fields(&favourite).expect("encode"),
            )
            .await
            .expect("insert favourite");
    }

    async fn favourites(store: &Arc<SqliteStore>) -> Vec<FavouriteEntry> {
        Cursor::new(
            Arc::clone(store),
            Scope::All(Table::FavouriteEntries),
            favourite_from_fields,
        )
        .collect_all()
        .await
        .expect("list favourites")
    }

    fn entry_with_sample(feed_id: &str, value: f64) -> ScheduledEntry {
        let mut entry = ScheduledEntry::new(feed_id);
        entry.sample = Some(Sample::new(
            value,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        ));
        entry
    }

    #[tokio::test]
    async fn no_favourite_means_no_write() {
        let store = store().await;
        let propagator = FavouritePropagator::new(Arc::clone(&store));

        let propagated = propagator
            .propagate_if_favourited(&entry_with_sample("temp-1", 21.5))
            .await
            .expect("propagate");

        assert!(!propagated);
        assert!(favourites(&store).await.is_empty());
    }

    #[tokio::test]
    async fn favourite_receives_sample_and_keeps_metadata() {
        let store = store().await;
        pin(&store, "temp-1", "Kitchen").await;
        pin(&store, "humidity-1", "Bathroom").await;
        let propagator = FavouritePropagator::new(Arc::clone(&store));
        let entry = entry_with_sample("temp-1", 21.5);

        let propagated = propagator
            .propagate_if_favourited(&entry)
            .await
            .expect("propagate");
        let favourites = favourites(&store).await;

        assert!(propagated);
        assert_eq!(favourites[0].sample, entry.sample);
        assert_eq!(favourites[0].name, "Kitchen");
        assert_eq!(favourites[0].unit, "°C");
        assert_eq!(favourites[1].sample, None);
    }

    #[tokio::test]
    async fn duplicate_favourites_all_receive_the_same_sample() {
        let store = store().await;
        pin(&store, "temp-1", "first").await;
        pin(&store, "temp-1", "second").await;
        let propagator = FavouritePropagator::new(Arc::clone(&store));
        let entry = entry_with_sample("temp-1", 19.0);

        propagator
            .propagate_if_favourited(&entry)
            .await
            .expect("propagate");

        assert!(favourites(&store)
            .await
            .iter()
            .all(|favourite| favourite.sample == entry.sample));
    }
}

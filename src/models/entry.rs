use serde::{Deserialize, Serialize};

use super::Sample;

/// A feed the scheduler refreshes on every trigger firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    /// Row id, `None` until the entry has been inserted.
    pub id: Option<i64>,
    pub feed_id: String,
    pub name: String,
    pub unit: String,
    pub sample: Option<Sample>,
    pub pending: bool,
}

impl ScheduledEntry {
    pub fn new(feed_id: impl Into<String>) -> Self {
        Self {
            id: None,
            feed_id: feed_id.into(),
            name: String::new(),
            unit: String::new(),
            sample: None,
            pending: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// A feed pinned by the user, carrying a denormalized copy of its latest sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavouriteEntry {
    pub feed_id: String,
    pub name: String,
    pub unit: String,
    pub sample: Option<Sample>,
}

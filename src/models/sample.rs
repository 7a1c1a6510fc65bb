use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading from a sensor feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Opaque payload attached by the feed, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Sample {
    #[cfg(test)]
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp,
            data: None,
        }
    }
}

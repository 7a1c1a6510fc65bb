//! Row store boundary.
//!
//! The scheduler never talks SQL. It addresses rows through a [`Scope`],
//! which renders as a URI such as `scheduled_entries/pending` or
//! `favourite_entries/temp-1`, and moves data around as a generic [`Fields`]
//! map. Anything that implements [`RowStore`] can back the scheduler.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use super::schema::{FAVOURITE_COLUMNS, SCHEDULED_COLUMNS};

pub type RowId = i64;

/// Column name to value, one map per row.
pub type Fields = BTreeMap<String, FieldValue>;

/// Rows fetched per round trip by a [`Cursor`].
pub const PAGE_SIZE: u64 = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row store unavailable: {0}")]
    Unavailable(#[from] tokio_rusqlite::Error),

    #[error("unknown column `{column}` for {table}")]
    UnknownColumn { table: Table, column: String },

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("sample codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid scope `{0}`")]
    InvalidScope(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    ScheduledEntries,
    FavouriteEntries,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::ScheduledEntries => "scheduled_entries",
            Table::FavouriteEntries => "favourite_entries",
        }
    }

    /// Columns callers may write. `id` is assigned by the store and is never
    /// writable.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::ScheduledEntries => SCHEDULED_COLUMNS,
            Table::FavouriteEntries => FAVOURITE_COLUMNS,
        }
    }

    pub fn check_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), StoreError> {
        let allowed = self.columns();
        for column in columns {
            if !allowed.contains(&column.as_str()) {
                return Err(StoreError::UnknownColumn {
                    table: *self,
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled_entries" => Ok(Table::ScheduledEntries),
            "favourite_entries" => Ok(Table::FavouriteEntries),
            other => Err(StoreError::InvalidScope(other.to_string())),
        }
    }
}

/// A URI-addressable subset of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every row of a collection.
    All(Table),
    /// Scheduled entries with `pending = 1`.
    Pending,
    /// A single scheduled entry.
    ScheduledById(RowId),
    /// Every favourite pinned for a feed.
    FavouriteByFeed(String),
}

impl Scope {
    pub fn table(&self) -> Table {
        match self {
            Scope::All(table) => *table,
            Scope::Pending | Scope::ScheduledById(_) => Table::ScheduledEntries,
            Scope::FavouriteByFeed(_) => Table::FavouriteEntries,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All(table) => write!(f, "{table}"),
            Scope::Pending => write!(f, "{}/pending", Table::ScheduledEntries),
            Scope::ScheduledById(id) => write!(f, "{}/{id}", Table::ScheduledEntries),
            Scope::FavouriteByFeed(feed_id) => write!(
                f,
                "{}/{}",
                Table::FavouriteEntries,
                urlencoding::encode(feed_id)
            ),
        }
    }
}

impl FromStr for Scope {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidScope(s.to_string());

        let Some((table, rest)) = s.split_once('/') else {
            return Ok(Scope::All(s.parse().map_err(|_| invalid())?));
        };

        match (table.parse::<Table>().map_err(|_| invalid())?, rest) {
            (_, "") => Err(invalid()),
            (Table::ScheduledEntries, "pending") => Ok(Scope::Pending),
            (Table::ScheduledEntries, id) => id
                .parse()
                .map(Scope::ScheduledById)
                .map_err(|_| invalid()),
            (Table::FavouriteEntries, feed_id) => urlencoding::decode(feed_id)
                .map(|decoded| Scope::FavouriteByFeed(decoded.into_owned()))
                .map_err(|_| invalid()),
        }
    }
}

/// Keyset page: rows with `id > after`, in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub after: Option<RowId>,
    pub limit: u64,
}

/// CRUD over the two logical collections.
///
/// Every returned row includes its `id` column, which [`Cursor`] uses to
/// page forward.
#[allow(async_fn_in_trait)]
pub trait RowStore {
    async fn query(&self, scope: &Scope, page: Page) -> Result<Vec<Fields>, StoreError>;

    async fn insert(&self, table: Table, fields: Fields) -> Result<RowId, StoreError>;

    async fn update(&self, scope: &Scope, fields: Fields) -> Result<u64, StoreError>;

    async fn delete(&self, scope: &Scope) -> Result<u64, StoreError>;

    async fn count(&self, scope: &Scope) -> Result<u64, StoreError>;
}

/// Lazy, restartable sequence of typed rows.
///
/// Pages by id rather than offset, so rows that leave the scope while the
/// cursor is walking it (for example a pending flag being cleared) do not
/// make it skip the rows behind them.
pub struct Cursor<S, T> {
    store: Arc<S>,
    scope: Scope,
    decode: fn(&Fields) -> Result<T, StoreError>,
    after: Option<RowId>,
    buffer: VecDeque<Fields>,
    exhausted: bool,
}

impl<S: RowStore, T> Cursor<S, T> {
    pub fn new(store: Arc<S>, scope: Scope, decode: fn(&Fields) -> Result<T, StoreError>) -> Self {
        Self {
            store,
            scope,
            decode,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill().await {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let row = self.buffer.pop_front()?;
        Some((self.decode)(&row))
    }

    /// Start again from the first row of the scope.
    pub fn rewind(&mut self) {
        self.after = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    pub async fn collect_all(mut self) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    async fn fill(&mut self) -> Result<(), StoreError> {
        let page = Page {
            after: self.after,
            limit: PAGE_SIZE,
        };
        let rows = self.store.query(&self.scope, page).await?;

        self.exhausted = (rows.len() as u64) < PAGE_SIZE;
        match rows.last().and_then(|row| row.get("id")).and_then(FieldValue::as_i64) {
            Some(last_id) => self.after = Some(last_id),
            None => self.exhausted = true,
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

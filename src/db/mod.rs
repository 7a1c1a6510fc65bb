pub mod codec;
mod lease;
mod repository;
mod schema;
mod store;

pub use lease::Lease;
pub use repository::SqliteStore;
pub use store::{Cursor, FieldValue, Fields, Page, RowStore, Scope, StoreError, Table};

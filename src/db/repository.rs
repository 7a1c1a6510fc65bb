use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Row};
use tokio_rusqlite::Connection;

use super::schema::SCHEMA;
use super::store::{FieldValue, Fields, Page, RowId, RowStore, Scope, StoreError, Table};

/// SQLite-backed [`RowStore`].
pub struct SqliteStore {
    pub(super) conn: Connection,
}

impl SqliteStore {
    pub async fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

impl RowStore for SqliteStore {
    async fn query(&self, scope: &Scope, page: Page) -> Result<Vec<Fields>, StoreError> {
        let table = scope.table();
        let (filter, mut args) = where_clause(scope);

        let mut sql = format!(
            "SELECT id, {} FROM {} WHERE {}",
            table.columns().join(", "),
            table.name(),
            filter
        );
        if let Some(after) = page.after {
            sql.push_str(" AND id > ?");
            args.push(FieldValue::Integer(after));
        }
        sql.push_str(" ORDER BY id LIMIT ?");
        args.push(FieldValue::Integer(i64::try_from(page.limit).unwrap_or(i64::MAX)));

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let names: Vec<String> = stmt
                    .column_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let rows = stmt
                    .query_map(params_from_iter(args.iter()), |row| fields_from_row(row, &names))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn insert(&self, table: Table, fields: Fields) -> Result<RowId, StoreError> {
        table.check_columns(fields.keys())?;

        let (columns, values): (Vec<String>, Vec<FieldValue>) = fields.into_iter().unzip();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table.name())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name(),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(&sql, params_from_iter(values.iter()))?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    async fn update(&self, scope: &Scope, fields: Fields) -> Result<u64, StoreError> {
        let table = scope.table();
        table.check_columns(fields.keys())?;
        if fields.is_empty() {
            return Ok(0);
        }

        let (filter, filter_args) = where_clause(scope);
        let (columns, mut args): (Vec<String>, Vec<FieldValue>) = fields.into_iter().unzip();
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table.name(),
            assignments.join(", "),
            filter
        );
        args.extend(filter_args);

        let affected = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, params_from_iter(args.iter()))?))
            .await?;
        Ok(affected as u64)
    }

    async fn delete(&self, scope: &Scope) -> Result<u64, StoreError> {
        let (filter, args) = where_clause(scope);
        let sql = format!("DELETE FROM {} WHERE {}", scope.table().name(), filter);

        let affected = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, params_from_iter(args.iter()))?))
            .await?;
        Ok(affected as u64)
    }

    async fn count(&self, scope: &Scope) -> Result<u64, StoreError> {
        let (filter, args) = where_clause(scope);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", scope.table().name(), filter);

        let count = self
            .conn
            .call(move |conn| {
                let count: i64 =
                    conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn where_clause(scope: &Scope) -> (&'static str, Vec<FieldValue>) {
    match scope {
        Scope::All(_) => ("1 = 1", Vec::new()),
        Scope::Pending => ("pending = 1", Vec::new()),
        Scope::ScheduledById(id) => ("id = ?", vec![FieldValue::Integer(*id)]),
        Scope::FavouriteByFeed(feed_id) => ("feed_id = ?", vec![feed_id.as_str().into()]),
    }
}

fn fields_from_row(row: &Row, names: &[String]) -> rusqlite::Result<Fields> {
    let mut fields = Fields::new();
    for (index, name) in names.iter().enumerate() {
        let value = match row.get_ref(index)? {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(v) => FieldValue::Integer(v),
            ValueRef::Real(v) => FieldValue::Real(v),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        };
        fields.insert(name.clone(), value);
    }
    Ok(fields)
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            FieldValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            FieldValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

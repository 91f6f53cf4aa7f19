//! The generic data-manager contract and its SQLite implementation for
//! every entity that maps onto one table.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params_from_iter};
use supper_types::filter::{ListPage, Pagination, QueryFilter};
use supper_types::time;

use crate::error::{DbError, DbResult};
use crate::Database;

/// An entity stored as one row of `TABLE`. Every table carries `id` and the
/// `created_at`/`last_updated_at`/`archived_at` triple besides `COLUMNS`.
pub trait Record: Sized + Send + 'static {
    const TABLE: &'static str;
    /// Data columns in the order `values` returns them.
    const COLUMNS: &'static [&'static str];
    /// Ordering for child collections loaded alongside a parent.
    const CHILD_ORDER: &'static str = "created_at, id";
    /// Columns written on insert but never by the generic update. Only the
    /// dedicated transitions (finalization and the like) change them.
    const STATE_COLUMNS: &'static [&'static str] = &[];

    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn touch(&mut self, now: DateTime<Utc>);
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
    fn values(&self) -> Vec<Value>;

    fn load_children(&mut self, _conn: &Connection) -> DbResult<()> {
        Ok(())
    }

    fn insert_children(&self, _conn: &Connection) -> DbResult<()> {
        Ok(())
    }

    fn update_children(&self, _conn: &Connection) -> DbResult<()> {
        Ok(())
    }

    /// Runs inside the write transaction before a new row is inserted. May
    /// refuse the write or adjust related rows.
    fn before_insert(&self, _conn: &Connection) -> DbResult<()> {
        Ok(())
    }

    /// Runs inside the write transaction before row `id` is updated or
    /// archived.
    fn before_write(_conn: &Connection, _id: &str, _write: Write) -> DbResult<()> {
        Ok(())
    }
}

/// The kind of change a write guard is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    Update,
    Archive,
}

/// Implements the timestamp accessors of `Record` for a struct with the
/// standard `created_at`/`last_updated_at` fields.
macro_rules! record_timestamps {
    () => {
        fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
            self.created_at
        }

        fn touch(&mut self, now: chrono::DateTime<chrono::Utc>) {
            self.last_updated_at = Some(now);
        }
    };
}
pub(crate) use record_timestamps;

/// Extra WHERE conditions restricting which rows an operation may see.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.clauses.push(format!("{} = ?", column));
        self.params.push(Value::Text(value.into()));
        self
    }

    /// Adds a raw condition; `params` bind its `?` placeholders in order.
    pub fn raw(mut self, clause: &str, params: impl IntoIterator<Item = String>) -> Self {
        self.clauses.push(format!("({})", clause));
        self.params.extend(params.into_iter().map(Value::Text));
        self
    }

    fn sql(&self) -> String {
        self.clauses.iter().map(|c| format!(" AND {}", c)).collect()
    }
}

/// Generic storage contract shared by every entity.
pub trait DataManager<T> {
    fn exists(&self, id: &str, scope: &Scope) -> DbResult<bool>;
    fn get(&self, id: &str, scope: &Scope) -> DbResult<T>;
    fn list(&self, scope: &Scope, filter: &QueryFilter) -> DbResult<ListPage<T>>;
    fn create(&self, entity: &T) -> DbResult<()>;
    /// Persists `entity` and stamps its `last_updated_at`.
    fn update(&self, entity: &mut T) -> DbResult<()>;
    fn archive(&self, id: &str, scope: &Scope) -> DbResult<()>;
}

impl<T: Record> DataManager<T> for Database {
    fn exists(&self, id: &str, scope: &Scope) -> DbResult<bool> {
        self.with_conn(|conn| exists::<T>(conn, id, scope))
    }

    fn get(&self, id: &str, scope: &Scope) -> DbResult<T> {
        self.with_conn(|conn| fetch_one::<T>(conn, id, scope))
    }

    fn list(&self, scope: &Scope, filter: &QueryFilter) -> DbResult<ListPage<T>> {
        self.with_conn(|conn| list::<T>(conn, scope, filter))
    }

    fn create(&self, entity: &T) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            entity.before_insert(&tx)?;
            insert(&tx, entity)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn update(&self, entity: &mut T) -> DbResult<()> {
        let now = time::now();
        self.with_conn_mut(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            T::before_write(&tx, entity.id(), Write::Update)?;
            update_row(&tx, entity, now)?;
            entity.update_children(&tx)?;
            tx.commit()?;
            Ok(())
        })?;
        entity.touch(now);
        Ok(())
    }

    fn archive(&self, id: &str, scope: &Scope) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            T::before_write(&tx, id, Write::Archive)?;
            archive_row::<T>(&tx, id, scope, time::now())?;
            tx.commit()?;
            Ok(())
        })
    }
}

// -- Row helpers shared by the entity modules --

pub(crate) fn select_list<T: Record>() -> String {
    let mut cols = vec!["id"];
    cols.extend_from_slice(T::COLUMNS);
    cols.extend_from_slice(&["created_at", "last_updated_at", "archived_at"]);
    cols.join(", ")
}

pub(crate) fn exists<T: Record>(conn: &Connection, id: &str, scope: &Scope) -> DbResult<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ? AND archived_at IS NULL{})",
        T::TABLE,
        scope.sql()
    );
    let mut params = vec![Value::Text(id.to_string())];
    params.extend(scope.params.iter().cloned());
    Ok(conn.query_row(&sql, params_from_iter(params), |r| r.get(0))?)
}

pub(crate) fn fetch_one<T: Record>(conn: &Connection, id: &str, scope: &Scope) -> DbResult<T> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ? AND archived_at IS NULL{}",
        select_list::<T>(),
        T::TABLE,
        scope.sql()
    );
    let mut params = vec![Value::Text(id.to_string())];
    params.extend(scope.params.iter().cloned());
    let mut entity = conn.query_row(&sql, params_from_iter(params), T::from_row)?;
    entity.load_children(conn)?;
    Ok(entity)
}

/// All live rows matching `scope`, ordered by `CHILD_ORDER`, with children.
pub(crate) fn fetch_where<T: Record>(conn: &Connection, scope: &Scope) -> DbResult<Vec<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE archived_at IS NULL{} ORDER BY {}",
        select_list::<T>(),
        T::TABLE,
        scope.sql(),
        T::CHILD_ORDER
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params_from_iter(scope.params.iter()), T::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for row in &mut rows {
        row.load_children(conn)?;
    }
    Ok(rows)
}

pub(crate) fn list<T: Record>(conn: &Connection, scope: &Scope, filter: &QueryFilter) -> DbResult<ListPage<T>> {
    let archived = if filter.include_archived { "1 = 1" } else { "archived_at IS NULL" };
    let base = format!("FROM {} WHERE {}{}", T::TABLE, archived, scope.sql());

    let mut conditions = String::new();
    let mut params: Vec<Value> = scope.params.clone();
    let (created_after, created_before) = filter.created_range();
    let (updated_after, updated_before) = filter.updated_range();
    for (clause, bound) in [
        (" AND created_at > ?", created_after),
        (" AND created_at < ?", created_before),
        (" AND last_updated_at > ?", updated_after),
        (" AND last_updated_at < ?", updated_before),
    ] {
        if let Some(t) = bound {
            conditions.push_str(clause);
            params.push(Value::Integer(t.timestamp_millis()));
        }
    }

    let total_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {}", base),
        params_from_iter(scope.params.iter()),
        |r| r.get(0),
    )?;
    let filtered_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {}{}", base, conditions),
        params_from_iter(params.iter()),
        |r| r.get(0),
    )?;

    let dir = filter.sort().as_sql();
    let sql = format!(
        "SELECT {} {}{} ORDER BY created_at {dir}, id {dir} LIMIT ? OFFSET ?",
        select_list::<T>(),
        base,
        conditions,
    );
    params.push(Value::Integer(i64::from(filter.limit())));
    params.push(Value::Integer(filter.offset() as i64));

    let mut stmt = conn.prepare(&sql)?;
    let mut data = stmt
        .query_map(params_from_iter(params), T::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for row in &mut data {
        row.load_children(conn)?;
    }

    Ok(ListPage {
        data,
        pagination: Pagination {
            page: filter.page(),
            limit: filter.limit(),
            filtered_count: filtered_count as u64,
            total_count: total_count as u64,
        },
    })
}

pub(crate) fn insert<T: Record>(conn: &Connection, entity: &T) -> DbResult<()> {
    let cols = select_list::<T>();
    let placeholders = vec!["?"; T::COLUMNS.len() + 4].join(", ");
    let sql = format!("INSERT INTO {} ({}) VALUES ({})", T::TABLE, cols, placeholders);

    let mut params = vec![Value::Text(entity.id().to_string())];
    params.extend(entity.values());
    params.push(ms(entity.created_at()));
    params.push(Value::Null);
    params.push(Value::Null);
    conn.execute(&sql, params_from_iter(params))?;
    entity.insert_children(conn)
}

/// Writes every column except `STATE_COLUMNS`, so a stale copy cannot roll
/// back a transition committed since it was read.
pub(crate) fn update_row<T: Record>(conn: &Connection, entity: &T, now: DateTime<Utc>) -> DbResult<()> {
    let (assignments, mut params): (Vec<String>, Vec<Value>) = T::COLUMNS
        .iter()
        .zip(entity.values())
        .filter(|(c, _)| !T::STATE_COLUMNS.contains(*c))
        .map(|(c, v)| (format!("{} = ?", c), v))
        .unzip();
    let sql = format!(
        "UPDATE {} SET {}, last_updated_at = ? WHERE id = ? AND archived_at IS NULL",
        T::TABLE,
        assignments.join(", ")
    );
    params.push(ms(now));
    params.push(Value::Text(entity.id().to_string()));
    match conn.execute(&sql, params_from_iter(params))? {
        0 => Err(DbError::NotFound),
        _ => Ok(()),
    }
}

/// Soft-deletes a live row. A row that is missing, out of scope or already
/// archived reports `NotFound`, so of two racing archives only one succeeds.
pub(crate) fn archive_row<T: Record>(conn: &Connection, id: &str, scope: &Scope, now: DateTime<Utc>) -> DbResult<()> {
    let sql = format!(
        "UPDATE {} SET archived_at = ?, last_updated_at = ? WHERE id = ? AND archived_at IS NULL{}",
        T::TABLE,
        scope.sql()
    );
    let mut params = vec![ms(now), ms(now), Value::Text(id.to_string())];
    params.extend(scope.params.iter().cloned());
    match conn.execute(&sql, params_from_iter(params))? {
        0 => Err(DbError::NotFound),
        _ => Ok(()),
    }
}

// -- Value conversions --

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub(crate) fn opt_text(s: Option<&str>) -> Value {
    s.map(text).unwrap_or(Value::Null)
}

pub(crate) fn ms(t: DateTime<Utc>) -> Value {
    Value::Integer(t.timestamp_millis())
}

pub(crate) fn opt_ms(t: Option<DateTime<Utc>>) -> Value {
    t.map(ms).unwrap_or(Value::Null)
}

pub(crate) fn int(n: impl Into<i64>) -> Value {
    Value::Integer(n.into())
}

pub(crate) fn opt_int(n: Option<impl Into<i64>>) -> Value {
    n.map(int).unwrap_or(Value::Null)
}

pub(crate) fn flag(b: bool) -> Value {
    Value::Integer(i64::from(b))
}

pub(crate) fn real(f: f32) -> Value {
    Value::Real(f64::from(f))
}

pub(crate) fn opt_real(f: Option<f32>) -> Value {
    f.map(real).unwrap_or(Value::Null)
}

pub(crate) fn read_ms(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let v: i64 = row.get(col)?;
    time::from_millis(v).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, v))
}

pub(crate) fn read_opt_ms(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(col)? {
        Some(v) => time::from_millis(v).map(Some).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, v)),
        None => Ok(None),
    }
}

pub(crate) fn read_f32(row: &Row<'_>, col: &str) -> rusqlite::Result<f32> {
    Ok(row.get::<_, f64>(col)? as f32)
}

pub(crate) fn read_opt_f32(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<f32>> {
    Ok(row.get::<_, Option<f64>>(col)?.map(|v| v as f32))
}

pub(crate) fn read_enum<E>(row: &Row<'_>, col: &str) -> rusqlite::Result<E>
where
    E: FromStr,
    E::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(col)?;
    s.parse().map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

pub(crate) fn read_json<J: serde::de::DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<J> {
    let s: String = row.get(col)?;
    serde_json::from_str(&s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

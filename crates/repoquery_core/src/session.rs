//! Persistence session over one SQLite connection.
//!
//! # Responsibility
//! - Run rendered engine SQL and surface raw rows.
//! - Provide entity CRUD (`save`, `find_by_id`, `delete`, `count`).
//! - Keep the working set: entities loaded or saved through this session,
//!   each with a stale flag raised by bulk updates.
//!
//! # Invariants
//! - A session is used by one thread at a time; it is not `Sync`.
//! - Read-only queries never enter the working set.
//! - Reloading an entity clears its stale flag.

use crate::db::{DbError, DbResult};
use crate::model::Entity;
use crate::query::error::QueryResult;
use crate::query::plan::RenderedSql;
use crate::query::row::{FromRow, ResultRow};
use crate::schema::EntitySchema;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-query switches passed from the executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions<'s> {
    /// Skip working-set tracking.
    pub read_only: bool,
    /// Entity whose `id` labels are tracked.
    pub track: Option<&'static str>,
    /// Rename raw column names to property names of this schema.
    pub relabel: Option<&'s EntitySchema>,
}

/// Storage adapter the query engine runs against.
pub trait PersistenceSession {
    fn save<E: Entity>(&self, entity: &E) -> DbResult<Uuid>;
    fn find_by_id<E: Entity>(&self, id: Uuid) -> QueryResult<Option<E>>;
    fn delete<E: Entity>(&self, id: Uuid) -> DbResult<bool>;
    fn count<E: Entity>(&self) -> DbResult<u64>;

    /// Pushes pending writes to the store. Writes are immediate here.
    fn flush(&self) -> DbResult<()>;
    /// Detaches every working-set entry.
    fn clear(&self);

    fn query_rows(&self, sql: &RenderedSql, options: QueryOptions<'_>) -> DbResult<Vec<ResultRow>>;
    fn query_count(&self, sql: &RenderedSql) -> DbResult<u64>;
    fn execute(&self, sql: &RenderedSql) -> DbResult<usize>;
    /// Whether a caller-owned transaction is open, so row locks outlive
    /// the statement that takes them.
    fn in_transaction(&self) -> bool;

    /// Marks every tracked entry of `entity` stale, returning how many.
    fn mark_stale(&self, entity: &'static str) -> usize;
    fn is_stale(&self, entity: &str, id: Uuid) -> bool;
    fn is_tracked(&self, entity: &str, id: Uuid) -> bool;
    fn tracked_len(&self) -> usize;
}

type WorkingSetKey = (String, String);

pub struct SqliteSession<'conn> {
    conn: &'conn Connection,
    working_set: RefCell<HashMap<WorkingSetKey, bool>>,
}

impl<'conn> SqliteSession<'conn> {
    /// Accepts a plain connection or a `Transaction` (through deref).
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            working_set: RefCell::new(HashMap::new()),
        }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    fn track(&self, entity: &str, id: String) {
        self.working_set
            .borrow_mut()
            .insert((entity.to_string(), id), false);
    }

    fn key(entity: &str, id: Uuid) -> WorkingSetKey {
        (entity.to_string(), id.to_string())
    }
}

impl PersistenceSession for SqliteSession<'_> {
    fn save<E: Entity>(&self, entity: &E) -> DbResult<Uuid> {
        let schema = E::schema();
        let values = entity.column_values();
        let columns = values.iter().map(|(column, _)| *column).collect::<Vec<_>>();
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>();
        let id_column = schema.id_column();
        let mut updates = columns
            .iter()
            .filter(|column| !column.eq_ignore_ascii_case(id_column))
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>();
        updates.push("updated_at = (strftime('%s', 'now') * 1000)".to_string());

        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
             ON CONFLICT({id_column}) DO UPDATE SET {updates}",
            table = schema.table,
            columns = columns.join(", "),
            placeholders = placeholders.join(", "),
            updates = updates.join(", "),
        );
        self.conn
            .execute(&sql, params_from_iter(values.iter().map(|(_, value)| value)))?;

        let id = entity.id();
        self.track(schema.name, id.to_string());
        log::debug!(
            "event=entity_save module=session status=ok entity={} id={id}",
            schema.name
        );
        Ok(id)
    }

    fn find_by_id<E: Entity>(&self, id: Uuid) -> QueryResult<Option<E>> {
        let schema = E::schema();
        let sql = format!(
            "SELECT {} FROM {table} e WHERE e.{id_column} = ?1",
            schema.select_list("e", None),
            table = schema.table,
            id_column = schema.id_column(),
        );
        let rendered = RenderedSql {
            sql,
            values: vec![Value::Text(id.to_string())],
        };
        let rows = self.query_rows(
            &rendered,
            QueryOptions {
                track: Some(schema.name),
                ..QueryOptions::default()
            },
        )?;
        rows.first().map(|row| E::from_row(row.view())).transpose()
    }

    fn delete<E: Entity>(&self, id: Uuid) -> DbResult<bool> {
        let schema = E::schema();
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            schema.table,
            schema.id_column()
        );
        let deleted = self.conn.execute(&sql, params![id.to_string()])?;
        self.working_set
            .borrow_mut()
            .remove(&Self::key(schema.name, id));
        Ok(deleted > 0)
    }

    fn count<E: Entity>(&self) -> DbResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", E::schema().table);
        self.query_count(&RenderedSql {
            sql,
            values: Vec::new(),
        })
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn clear(&self) {
        self.working_set.borrow_mut().clear();
    }

    fn query_rows(&self, sql: &RenderedSql, options: QueryOptions<'_>) -> DbResult<Vec<ResultRow>> {
        log::trace!("event=sql_query module=session sql={}", sql.sql);
        let mut stmt = self.conn.prepare(&sql.sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(|name| {
                options
                    .relabel
                    .and_then(|schema| schema.property_by_column(name))
                    .map_or_else(|| name.to_string(), |property| property.name.to_string())
            })
            .collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(sql.values.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..width)
                .map(|index| row.get::<_, Value>(index))
                .collect::<Result<Vec<_>, _>>()?;
            result.push(ResultRow::new(Arc::clone(&columns), values));
        }

        if let (false, Some(entity)) = (options.read_only, options.track) {
            for row in &result {
                if let Some(Value::Text(id)) = row.value("id") {
                    self.track(entity, id.clone());
                }
            }
        }
        Ok(result)
    }

    fn query_count(&self, sql: &RenderedSql) -> DbResult<u64> {
        log::trace!("event=sql_count module=session sql={}", sql.sql);
        let count: i64 = self
            .conn
            .query_row(&sql.sql, params_from_iter(sql.values.iter()), |row| row.get(0))?;
        u64::try_from(count).map_err(|_| {
            DbError::Sqlite(rusqlite::Error::IntegralValueOutOfRange(0, count))
        })
    }

    fn execute(&self, sql: &RenderedSql) -> DbResult<usize> {
        log::trace!("event=sql_execute module=session sql={}", sql.sql);
        let mut stmt = self.conn.prepare(&sql.sql)?;
        Ok(stmt.execute(params_from_iter(sql.values.iter()))?)
    }

    fn mark_stale(&self, entity: &'static str) -> usize {
        let mut working_set = self.working_set.borrow_mut();
        let mut marked = 0;
        for ((tracked, _), stale) in working_set.iter_mut() {
            if tracked == entity {
                *stale = true;
                marked += 1;
            }
        }
        marked
    }

    fn is_stale(&self, entity: &str, id: Uuid) -> bool {
        self.working_set
            .borrow()
            .get(&Self::key(entity, id))
            .copied()
            .unwrap_or(false)
    }

    fn is_tracked(&self, entity: &str, id: Uuid) -> bool {
        self.working_set
            .borrow()
            .contains_key(&Self::key(entity, id))
    }

    fn tracked_len(&self) -> usize {
        self.working_set.borrow().len()
    }
}

//! Persisted entities and their projections.
//!
//! # Responsibility
//! - Define the `Member`/`Team` records the repositories serve.
//! - Register each entity's static schema with the query engine.
//!
//! # Invariants
//! - Every entity is identified by a stable `Uuid`, stored as TEXT.
//! - `Member` owns the member-team link; `Team::members` is the inverse
//!   view and is only populated by queries that fetch it.

use crate::query::row::FromRow;
use crate::schema::EntitySchema;
use rusqlite::types::Value;
use uuid::Uuid;

pub mod dto;
pub mod member;
pub mod team;

/// A record mapped onto one table by a static schema.
pub trait Entity: FromRow {
    fn schema() -> &'static EntitySchema;

    fn id(&self) -> Uuid;

    /// `(column, value)` pairs of every stored column, identifier included.
    fn column_values(&self) -> Vec<(&'static str, Value)>;
}

fn uuid_value(id: Uuid) -> Value {
    Value::Text(id.to_string())
}

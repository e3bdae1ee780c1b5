//! Raw result sets to declared return shapes.
//!
//! # Invariants
//! - Single: zero rows is `None`, more than one is `TooManyResults`.
//! - Collection fetches fold repeated owner rows into one value, in
//!   first-seen order, keyed by the `id` label.
//! - Slice: a probe row beyond the page size sets `has_next` and is dropped
//!   before mapping.

use crate::query::error::{QueryError, QueryResult};
use crate::query::executor::RawResult;
use crate::query::page::{Page, PageRequest, Slice};
use crate::query::row::{FromRow, ResultRow};
use rusqlite::types::Value;
use std::collections::HashMap;

pub fn map_one<T: FromRow>(method: &str, raw: RawResult, fold_owners: bool) -> QueryResult<Option<T>> {
    let mut values = map_rows::<T>(raw.rows, fold_owners)?;
    match values.len() {
        0 => Ok(None),
        1 => Ok(values.pop()),
        count => Err(QueryError::TooManyResults {
            method: method.to_string(),
            count,
        }),
    }
}

pub fn map_list<T: FromRow>(raw: RawResult, fold_owners: bool) -> QueryResult<Vec<T>> {
    map_rows(raw.rows, fold_owners)
}

pub fn map_page<T: FromRow>(raw: RawResult, request: &PageRequest) -> QueryResult<Page<T>> {
    let total = raw.total.ok_or_else(|| {
        QueryError::InvalidData("page result without a total count".to_string())
    })?;
    let content = map_rows(raw.rows, false)?;
    Ok(Page::new(content, request, total))
}

pub fn map_slice<T: FromRow>(raw: RawResult, request: &PageRequest) -> QueryResult<Slice<T>> {
    let mut rows = raw.rows;
    let size = usize::try_from(request.size()).unwrap_or(usize::MAX);
    let has_next = rows.len() > size;
    rows.truncate(size);
    let content = map_rows(rows, false)?;
    Ok(Slice::new(content, request, has_next))
}

fn map_rows<T: FromRow>(rows: Vec<ResultRow>, fold_owners: bool) -> QueryResult<Vec<T>> {
    if !fold_owners {
        return rows.iter().map(|row| T::from_row(row.view())).collect();
    }

    let mut values: Vec<T> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in &rows {
        let key = owner_key(row)?;
        match positions.get(&key) {
            Some(&position) => values[position].absorb(row.view())?,
            None => {
                positions.insert(key, values.len());
                values.push(T::from_row(row.view())?);
            }
        }
    }
    Ok(values)
}

fn owner_key(row: &ResultRow) -> QueryResult<String> {
    match row.value("id") {
        Some(Value::Text(text)) => Ok(text.clone()),
        Some(Value::Integer(value)) => Ok(value.to_string()),
        other => Err(QueryError::InvalidData(format!(
            "collection fetch row without an owner id: {other:?}"
        ))),
    }
}

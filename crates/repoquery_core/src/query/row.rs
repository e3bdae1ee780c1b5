//! Raw result rows and the traits that map them into caller types.

use crate::query::error::{QueryError, QueryResult};
use crate::query::method::ProjectionTarget;
use rusqlite::types::Value;
use std::sync::Arc;
use uuid::Uuid;

/// One row of a raw result set: output-column labels plus values.
///
/// Rows of one result set share the same label slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl ResultRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, label: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column == label)
            .and_then(|index| self.values.get(index))
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    /// Root view: labels are looked up unprefixed.
    pub fn view(&self) -> RowRef<'_> {
        RowRef {
            row: self,
            prefix: String::new(),
        }
    }
}

/// View over a row, optionally scoped to a `prefix.` of fetched labels.
#[derive(Debug, Clone)]
pub struct RowRef<'a> {
    row: &'a ResultRow,
    prefix: String,
}

impl<'a> RowRef<'a> {
    /// Narrows the view to labels under `name.` (a fetched association).
    pub fn scope(&self, name: &str) -> RowRef<'a> {
        RowRef {
            row: self.row,
            prefix: format!("{}{name}.", self.prefix),
        }
    }

    pub fn row(&self) -> &'a ResultRow {
        self.row
    }

    pub fn has(&self, label: &str) -> bool {
        self.value(label).is_some()
    }

    pub fn value(&self, label: &str) -> Option<&'a Value> {
        if self.prefix.is_empty() {
            self.row.value(label)
        } else {
            self.row.value(&format!("{}{label}", self.prefix))
        }
    }

    /// True when the label exists and holds SQL NULL, or is absent.
    pub fn is_null(&self, label: &str) -> bool {
        matches!(self.value(label), None | Some(Value::Null))
    }

    pub fn text(&self, label: &str) -> QueryResult<String> {
        self.opt_text(label)?
            .ok_or_else(|| self.invalid(label, "unexpected NULL"))
    }

    pub fn opt_text(&self, label: &str) -> QueryResult<Option<String>> {
        match self.require(label)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            Value::Integer(value) => Ok(Some(value.to_string())),
            other => Err(self.invalid(label, &format!("expected text, got {other:?}"))),
        }
    }

    pub fn integer(&self, label: &str) -> QueryResult<i64> {
        match self.require(label)? {
            Value::Integer(value) => Ok(*value),
            other => Err(self.invalid(label, &format!("expected integer, got {other:?}"))),
        }
    }

    pub fn uuid(&self, label: &str) -> QueryResult<Uuid> {
        self.opt_uuid(label)?
            .ok_or_else(|| self.invalid(label, "unexpected NULL"))
    }

    pub fn opt_uuid(&self, label: &str) -> QueryResult<Option<Uuid>> {
        match self.opt_text(label)? {
            None => Ok(None),
            Some(text) => Uuid::parse_str(&text)
                .map(Some)
                .map_err(|_| self.invalid(label, &format!("invalid uuid `{text}`"))),
        }
    }

    fn require(&self, label: &str) -> QueryResult<&'a Value> {
        self.value(label)
            .ok_or_else(|| self.invalid(label, "missing output column"))
    }

    fn invalid(&self, label: &str, message: &str) -> QueryError {
        QueryError::InvalidData(format!("column `{}{label}`: {message}", self.prefix))
    }
}

/// Conversion of one result row into a caller type.
pub trait FromRow: Sized {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self>;

    /// Folds a further row of the same owner into `self`.
    ///
    /// Called instead of [`FromRow::from_row`] when a collection fetch
    /// repeats the owner; the default ignores the row.
    fn absorb(&mut self, row: RowRef<'_>) -> QueryResult<()> {
        let _ = row;
        Ok(())
    }
}

/// Closed DTO or view projection with statically known fields.
pub trait Projection: FromRow {
    const NAME: &'static str;
    const FIELDS: &'static [&'static str];

    fn target() -> ProjectionTarget {
        ProjectionTarget::new(Self::NAME, Self::FIELDS)
    }
}

impl FromRow for ResultRow {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        Ok(row.row().clone())
    }
}

impl FromRow for String {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        match row.row().first() {
            Some(Value::Text(value)) => Ok(value.clone()),
            Some(Value::Integer(value)) => Ok(value.to_string()),
            other => Err(QueryError::InvalidData(format!(
                "expected a text column, got {other:?}"
            ))),
        }
    }
}

impl FromRow for i64 {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        match row.row().first() {
            Some(Value::Integer(value)) => Ok(*value),
            other => Err(QueryError::InvalidData(format!(
                "expected an integer column, got {other:?}"
            ))),
        }
    }
}

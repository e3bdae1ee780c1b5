//! Compiled query plans and SQL templates.
//!
//! A plan is fixed at resolution time. Placeholders stay symbolic
//! ([`SqlPart::Param`]) until binding, because list arguments expand to a
//! variable number of `?` markers.

use crate::query::binder::QueryArg;
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlPart {
    Text(String),
    /// 0-based ordinal of the bound argument.
    Param(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlTemplate {
    parts: Vec<SqlPart>,
}

impl SqlTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Text(text.into())],
        }
    }

    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.parts.last_mut() {
            Some(SqlPart::Text(last)) => last.push_str(text),
            _ => self.parts.push(SqlPart::Text(text.to_string())),
        }
    }

    pub fn push_param(&mut self, index: usize) {
        self.parts.push(SqlPart::Param(index));
    }

    pub fn append(&mut self, other: &SqlTemplate) {
        for part in &other.parts {
            match part {
                SqlPart::Text(text) => self.push_text(text),
                SqlPart::Param(index) => self.push_param(*index),
            }
        }
    }

    pub fn parts(&self) -> &[SqlPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn param_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts.iter().filter_map(|part| match part {
            SqlPart::Param(index) => Some(*index),
            SqlPart::Text(_) => None,
        })
    }
}

/// Template text with `?N` standing in for each placeholder.
impl Display for SqlTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for part in &self.parts {
            match part {
                SqlPart::Text(text) => write!(f, "{text}")?,
                SqlPart::Param(index) => write!(f, "?{}", index + 1)?,
            }
        }
        Ok(())
    }
}

/// Final statement text plus positional values, ready for the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub values: Vec<Value>,
}

impl RenderedSql {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    pub fn push_value(&mut self, value: Value) {
        self.sql.push('?');
        self.values.push(value);
    }

    pub fn push_template(&mut self, template: &SqlTemplate, args: &[QueryArg]) {
        for part in template.parts() {
            match part {
                SqlPart::Text(text) => self.push(text),
                SqlPart::Param(index) => match args.get(*index) {
                    Some(arg) => self.push_arg(arg),
                    None => self.push_value(Value::Null),
                },
            }
        }
    }

    fn push_arg(&mut self, arg: &QueryArg) {
        match arg {
            // SQLite accepts `()`: `IN ()` is false and `NOT IN ()` is true.
            QueryArg::List(items) if items.is_empty() => self.push("()"),
            QueryArg::List(items) => {
                self.push("(");
                for (position, item) in items.iter().enumerate() {
                    if position > 0 {
                        self.push(", ");
                    }
                    self.push_value(item.to_value());
                }
                self.push(")");
            }
            scalar => self.push_value(scalar.to_value()),
        }
    }

    fn push_window(&mut self, window: Option<Window>) {
        if let Some(window) = window {
            self.push(" LIMIT ");
            self.push_value(Value::Integer(clamp_i64(window.limit)));
            self.push(" OFFSET ");
            self.push_value(Value::Integer(clamp_i64(window.offset)));
        }
    }

    fn push_order(&mut self, order: &[String]) {
        if !order.is_empty() {
            self.push(" ORDER BY ");
            self.push(&order.join(", "));
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Row window appended as `LIMIT ? OFFSET ?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Association of the root entity loaded eagerly by a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPath {
    pub path: &'static str,
    pub target: &'static str,
    pub collection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: &'static str,
    pub alias: String,
    pub on: String,
    pub fetch: Option<FetchPath>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromClause {
    pub table: &'static str,
    pub alias: String,
    pub joins: Vec<Join>,
}

impl FromClause {
    pub fn new(table: &'static str, alias: impl Into<String>) -> Self {
        Self {
            table,
            alias: alias.into(),
            joins: Vec::new(),
        }
    }

    /// Renders the clause; fetch joins are dropped when `with_fetch` is false.
    pub fn render(&self, with_fetch: bool) -> String {
        let mut sql = format!("{} {}", self.table, self.alias);
        for join in &self.joins {
            if join.fetch.is_some() && !with_fetch {
                continue;
            }
            let keyword = match join.kind {
                JoinKind::Inner => "JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            sql.push_str(&format!(" {keyword} {} {} ON {}", join.table, join.alias, join.on));
        }
        sql
    }

    pub fn fetch_paths(&self) -> impl Iterator<Item = &FetchPath> {
        self.joins.iter().filter_map(|join| join.fetch.as_ref())
    }

    pub fn fetches(&self, path: &str) -> bool {
        self.fetch_paths().any(|fetch| fetch.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountPlan {
    /// `COUNT(*)` over the same from/where, without fetch joins or ordering.
    Synthesized,
    Explicit(SqlTemplate),
}

/// SELECT over a mapped entity (derived, explicit and named strategies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectPlan {
    pub distinct: bool,
    pub select: SqlTemplate,
    pub from: FromClause,
    pub id_column: &'static str,
    pub filter: Option<SqlTemplate>,
    pub order: Option<SqlTemplate>,
    pub columns: Vec<String>,
    pub count: Option<CountPlan>,
    /// Sortable property or output label -> SQL expression.
    pub sort_keys: BTreeMap<String, String>,
}

impl SelectPlan {
    pub fn fetches_collection(&self) -> bool {
        self.from.fetch_paths().any(|fetch| fetch.collection)
    }

    pub(crate) fn rows_sql(
        &self,
        args: &[QueryArg],
        order: &[String],
        window: Option<Window>,
    ) -> RenderedSql {
        let mut out = RenderedSql::new();
        out.push(if self.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        out.push_template(&self.select, args);
        out.push(" FROM ");
        out.push(&self.from.render(true));
        self.push_filter(&mut out, args);

        let mut terms = Vec::new();
        if let Some(static_order) = &self.order {
            let mut rendered = RenderedSql::new();
            rendered.push_template(static_order, args);
            out.values.extend(rendered.values);
            terms.push(rendered.sql);
        }
        terms.extend(order.iter().cloned());
        out.push_order(&terms);
        out.push_window(window);
        out
    }

    pub(crate) fn count_sql(&self, args: &[QueryArg]) -> Option<RenderedSql> {
        let mut out = RenderedSql::new();
        match self.count.as_ref()? {
            CountPlan::Explicit(template) => out.push_template(template, args),
            CountPlan::Synthesized => {
                if self.distinct {
                    out.push(&format!(
                        "SELECT COUNT(DISTINCT {}.{}) FROM ",
                        self.from.alias, self.id_column
                    ));
                } else {
                    out.push("SELECT COUNT(*) FROM ");
                }
                out.push(&self.from.render(false));
                self.push_filter(&mut out, args);
            }
        }
        Some(out)
    }

    /// No-op UPDATE over the selected rows, taking the store write lock.
    pub(crate) fn lock_sql(&self, args: &[QueryArg]) -> RenderedSql {
        let id = self.id_column;
        let mut out = RenderedSql::new();
        out.push(&format!(
            "UPDATE {table} SET {id} = {id} WHERE {id} IN (SELECT {alias}.{id} FROM {from}",
            table = self.from.table,
            alias = self.from.alias,
            from = self.from.render(false),
        ));
        self.push_filter(&mut out, args);
        out.push(")");
        out
    }

    fn push_filter(&self, out: &mut RenderedSql, args: &[QueryArg]) {
        if let Some(filter) = &self.filter {
            out.push(" WHERE ");
            out.push_template(filter, args);
        }
    }
}

/// Native statement passed through except for placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativePlan {
    pub text: SqlTemplate,
    pub count: Option<SqlTemplate>,
    pub columns: Vec<String>,
}

impl NativePlan {
    /// Sorting and windowing wrap the statement instead of editing it.
    pub(crate) fn rows_sql(
        &self,
        args: &[QueryArg],
        order: &[String],
        window: Option<Window>,
    ) -> RenderedSql {
        let mut out = RenderedSql::new();
        if order.is_empty() && window.is_none() {
            out.push_template(&self.text, args);
            return out;
        }
        out.push("SELECT * FROM (");
        out.push_template(&self.text, args);
        out.push(") AS native_rows");
        out.push_order(order);
        out.push_window(window);
        out
    }

    pub(crate) fn count_sql(&self, args: &[QueryArg]) -> Option<RenderedSql> {
        let template = self.count.as_ref()?;
        let mut out = RenderedSql::new();
        out.push_template(template, args);
        Some(out)
    }
}

/// Bulk UPDATE/DELETE returning only an affected-row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPlan {
    pub statement: SqlTemplate,
    pub entity: &'static str,
}

impl MutationPlan {
    pub(crate) fn statement_sql(&self, args: &[QueryArg]) -> RenderedSql {
        let mut out = RenderedSql::new();
        out.push_template(&self.statement, args);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    Select(SelectPlan),
    Native(NativePlan),
    Mutation(MutationPlan),
}

impl QueryPlan {
    pub fn columns(&self) -> &[String] {
        match self {
            Self::Select(plan) => &plan.columns,
            Self::Native(plan) => &plan.columns,
            Self::Mutation(_) => &[],
        }
    }

    pub(crate) fn templates(&self) -> Vec<&SqlTemplate> {
        match self {
            Self::Select(plan) => {
                let mut templates = vec![&plan.select];
                templates.extend(plan.filter.as_ref());
                templates.extend(plan.order.as_ref());
                if let Some(CountPlan::Explicit(count)) = &plan.count {
                    templates.push(count);
                }
                templates
            }
            Self::Native(plan) => {
                let mut templates = vec![&plan.text];
                templates.extend(plan.count.as_ref());
                templates
            }
            Self::Mutation(plan) => vec![&plan.statement],
        }
    }
}

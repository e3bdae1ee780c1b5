//! Bound query execution against a persistence session.
//!
//! # Responsibility
//! - Render the bound plan into SQL and run it through the session.
//! - Apply windows (page size, slice probe row), dynamic sort, row locks and
//!   the read-only hint.
//! - Run the paired count of page queries.
//!
//! # Invariants
//! - Pessimistic-write queries touch their rows inside the caller's
//!   transaction before reading them; without an open transaction they fail
//!   before touching anything.
//! - Native text is only wrapped, never edited; native counts run verbatim.
//! - A page either gets both rows and total, or the call fails.

use crate::query::binder::BoundQuery;
use crate::query::descriptor::ResultKind;
use crate::query::error::{QueryError, QueryResult, ResolutionError};
use crate::query::method::{LockMode, ReturnShape};
use crate::query::plan::{QueryPlan, RenderedSql, Window};
use crate::query::row::ResultRow;
use crate::schema::EntitySchema;
use crate::session::{PersistenceSession, QueryOptions};

/// Raw rows plus the total of page queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub rows: Vec<ResultRow>,
    pub total: Option<u64>,
}

/// Runs a non-modifying bound query.
///
/// `schema` is the method's entity; native entity rows are relabelled
/// through it.
pub fn execute<S: PersistenceSession>(
    session: &S,
    schema: &EntitySchema,
    bound: &BoundQuery,
) -> QueryResult<RawResult> {
    let descriptor = &bound.descriptor;
    let window = window(bound);
    let entity_rows = descriptor.result == ResultKind::Entity;

    let (rows, count_sql) = match &descriptor.plan {
        QueryPlan::Select(plan) => {
            if bound.lock == LockMode::PessimisticWrite {
                lock_rows(session, bound, &plan.lock_sql(&bound.args))?;
            }
            let options = QueryOptions {
                read_only: bound.read_only,
                track: entity_rows.then_some(descriptor.entity),
                relabel: None,
            };
            let rows =
                session.query_rows(&plan.rows_sql(&bound.args, &bound.order, window), options)?;
            (rows, plan.count_sql(&bound.args))
        }
        QueryPlan::Native(plan) => {
            let options = QueryOptions {
                read_only: bound.read_only,
                track: entity_rows.then_some(descriptor.entity),
                relabel: entity_rows.then_some(schema),
            };
            let rows =
                session.query_rows(&plan.rows_sql(&bound.args, &bound.order, window), options)?;
            (rows, plan.count_sql(&bound.args))
        }
        QueryPlan::Mutation(_) => {
            return Err(ResolutionError::invalid(
                descriptor.method_name(),
                "modifying queries run through the mutation coordinator",
            )
            .into())
        }
    };

    let total = match (descriptor.returns, &bound.page) {
        (ReturnShape::Page, Some(page)) => {
            let size = usize::try_from(page.size()).unwrap_or(usize::MAX);
            if page.offset() == 0 && rows.len() < size {
                Some(rows.len() as u64)
            } else {
                let count_sql = count_sql.ok_or_else(|| {
                    QueryError::from(ResolutionError::invalid(
                        descriptor.method_name(),
                        "page query has no count plan",
                    ))
                })?;
                Some(session.query_count(&count_sql)?)
            }
        }
        _ => None,
    };

    log::debug!(
        "event=query_execute module=query status=ok method={} strategy={} rows={} total={}",
        descriptor.method_name(),
        descriptor.strategy,
        rows.len(),
        total.map_or_else(|| "-".to_string(), |total| total.to_string())
    );

    Ok(RawResult { rows, total })
}

/// Runs the statement of a modifying bound query, returning affected rows.
pub(crate) fn execute_statement<S: PersistenceSession>(
    session: &S,
    bound: &BoundQuery,
) -> QueryResult<usize> {
    match &bound.descriptor.plan {
        QueryPlan::Mutation(plan) => Ok(session.execute(&plan.statement_sql(&bound.args))?),
        _ => Err(ResolutionError::invalid(
            bound.descriptor.method_name(),
            "only modifying queries return an affected row count",
        )
        .into()),
    }
}

fn lock_rows<S: PersistenceSession>(
    session: &S,
    bound: &BoundQuery,
    lock: &RenderedSql,
) -> QueryResult<()> {
    if !session.in_transaction() {
        log::warn!(
            "event=query_lock module=query status=error method={} reason=no_transaction",
            bound.descriptor.method_name()
        );
        return Err(QueryError::TransactionRequired {
            method: bound.descriptor.method_name(),
        });
    }
    match session.execute(lock) {
        Ok(locked) => {
            log::debug!(
                "event=query_lock module=query status=ok method={} rows={locked}",
                bound.descriptor.method_name()
            );
            Ok(())
        }
        Err(err) => {
            log::warn!(
                "event=query_lock module=query status=error method={} lock_timeout={}",
                bound.descriptor.method_name(),
                err.is_lock_timeout()
            );
            Err(err.into())
        }
    }
}

/// Page windows fetch `size` rows, slice windows one extra probe row.
fn window(bound: &BoundQuery) -> Option<Window> {
    let page = bound.page.as_ref()?;
    let size = u64::from(page.size());
    match bound.descriptor.returns {
        ReturnShape::Page => Some(Window {
            limit: size,
            offset: page.offset(),
        }),
        ReturnShape::Slice => Some(Window {
            limit: size + 1,
            offset: page.offset(),
        }),
        _ => None,
    }
}

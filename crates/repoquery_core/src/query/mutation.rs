//! Bulk modifying statements.
//!
//! # Invariants
//! - A modifying query runs as one statement and returns only the
//!   affected-row count.
//! - After it runs, every working-set entry of the affected entity is
//!   marked stale; callers refresh or clear before trusting those values.

use crate::query::binder::BoundQuery;
use crate::query::error::QueryResult;
use crate::query::executor::execute_statement;
use crate::query::plan::QueryPlan;
use crate::session::PersistenceSession;

/// Runs a modifying bound query and signals staleness to the session.
pub fn execute_bulk<S: PersistenceSession>(session: &S, bound: &BoundQuery) -> QueryResult<usize> {
    let affected = execute_statement(session, bound)?;
    let entity = match &bound.descriptor.plan {
        QueryPlan::Mutation(plan) => plan.entity,
        _ => bound.descriptor.entity,
    };
    let stale = session.mark_stale(entity);
    log::info!(
        "event=bulk_update module=query status=ok method={} entity={entity} affected={affected} stale={stale}",
        bound.descriptor.method_name()
    );
    Ok(affected)
}

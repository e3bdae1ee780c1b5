//! Invocation entry points used by repositories.
//!
//! One call runs the whole pipeline: resolve (cached) -> bind -> execute ->
//! map. The declared return shape of the method must match the entry point.

use crate::query::binder::{bind, BoundQuery, QueryArg};
use crate::query::error::{QueryResult, ResolutionError};
use crate::query::executor::{execute, RawResult};
use crate::query::mapper::{map_list, map_one, map_page, map_slice};
use crate::query::method::{QueryMethod, ReturnShape};
use crate::query::mutation::execute_bulk;
use crate::query::page::{Page, PageRequest, Slice};
use crate::query::registry::RepositoryRegistry;
use crate::query::row::FromRow;
use crate::session::PersistenceSession;

/// Binds a registry to one persistence session.
pub struct QueryEngine<'a, S: PersistenceSession> {
    registry: &'a RepositoryRegistry,
    session: &'a S,
}

impl<'a, S: PersistenceSession> QueryEngine<'a, S> {
    pub fn new(registry: &'a RepositoryRegistry, session: &'a S) -> Self {
        Self { registry, session }
    }

    pub fn registry(&self) -> &'a RepositoryRegistry {
        self.registry
    }

    pub fn session(&self) -> &'a S {
        self.session
    }

    /// Zero or one value; more rows fail with `TooManyResults`.
    pub fn find_one<T: FromRow>(
        &self,
        method: &QueryMethod,
        args: Vec<QueryArg>,
    ) -> QueryResult<Option<T>> {
        let bound = self.bind(method, ReturnShape::One, args, None)?;
        let fold = bound.descriptor.fetches_collection();
        let raw = self.run(&bound)?;
        map_one(&bound.descriptor.method_name(), raw, fold)
    }

    pub fn find_list<T: FromRow>(
        &self,
        method: &QueryMethod,
        args: Vec<QueryArg>,
    ) -> QueryResult<Vec<T>> {
        let bound = self.bind(method, ReturnShape::List, args, None)?;
        let fold = bound.descriptor.fetches_collection();
        map_list(self.run(&bound)?, fold)
    }

    pub fn find_page<T: FromRow>(
        &self,
        method: &QueryMethod,
        args: Vec<QueryArg>,
        request: &PageRequest,
    ) -> QueryResult<Page<T>> {
        let bound = self.bind(method, ReturnShape::Page, args, Some(request.clone()))?;
        map_page(self.run(&bound)?, request)
    }

    pub fn find_slice<T: FromRow>(
        &self,
        method: &QueryMethod,
        args: Vec<QueryArg>,
        request: &PageRequest,
    ) -> QueryResult<Slice<T>> {
        let bound = self.bind(method, ReturnShape::Slice, args, Some(request.clone()))?;
        map_slice(self.run(&bound)?, request)
    }

    /// Derived `count...` methods and explicit `count(...)` selects.
    pub fn count(&self, method: &QueryMethod, args: Vec<QueryArg>) -> QueryResult<u64> {
        let count = self.find_one::<i64>(method, args)?.unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Runs a modifying method, returning the affected row count.
    pub fn execute_update(&self, method: &QueryMethod, args: Vec<QueryArg>) -> QueryResult<usize> {
        let bound = self.bind(method, ReturnShape::RowCount, args, None)?;
        execute_bulk(self.session, &bound)
    }

    fn bind(
        &self,
        method: &QueryMethod,
        expected: ReturnShape,
        args: Vec<QueryArg>,
        page: Option<PageRequest>,
    ) -> QueryResult<BoundQuery> {
        if method.returns != expected {
            return Err(ResolutionError::invalid(
                method.qualified_name(),
                format!(
                    "declared return shape {:?} cannot be invoked as {expected:?}",
                    method.returns
                ),
            )
            .into());
        }
        let descriptor = self.registry.resolve(method)?;
        Ok(bind(descriptor, args, page)?)
    }

    fn run(&self, bound: &BoundQuery) -> QueryResult<RawResult> {
        let schema = self
            .registry
            .schemas()
            .get(bound.descriptor.entity)
            .ok_or_else(|| {
                ResolutionError::invalid(bound.descriptor.method_name(), "entity is not registered")
            })?;
        execute(self.session, schema, bound)
    }
}

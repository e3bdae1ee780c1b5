//! Declarative query resolution and execution.
//!
//! Pipeline, leaf-first: [`predicate`] and `translate` compile method
//! metadata, [`descriptor`] picks the strategy, [`registry`] caches the
//! result, [`binder`] validates arguments, [`executor`] runs the SQL,
//! [`mapper`] shapes rows and [`mutation`] handles bulk statements.

pub mod binder;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod executor;
mod lexer;
pub mod mapper;
pub mod method;
pub mod mutation;
pub mod page;
pub mod plan;
pub mod predicate;
pub mod registry;
pub mod row;
mod translate;

pub use binder::{bind, BoundQuery, QueryArg};
pub use descriptor::{ExpectedParam, QueryDescriptor, ResultKind, Strategy};
pub use engine::QueryEngine;
pub use error::{BindError, QueryError, QueryResult, ResolutionError};
pub use executor::RawResult;
pub use method::{
    LockMode, MethodSignature, Param, ParamType, ProjectionTarget, QueryMethod, QueryText,
    ReturnShape, ScalarType,
};
pub use page::{Direction, Order, Page, PageRequest, Slice, Sort};
pub use registry::{RegistryBuilder, RepositoryRegistry};
pub use row::{FromRow, Projection, ResultRow, RowRef};

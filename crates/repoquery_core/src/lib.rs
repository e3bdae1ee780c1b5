//! Declarative repository query engine over SQLite.
//!
//! Repository methods are static declarations; the engine derives, compiles
//! and caches their queries, binds arguments, runs them through a
//! persistence session and maps rows into entities, projections and pages.

pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod schema;
pub mod service;
pub mod session;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::dto::{MemberDto, MemberProjection, UsernameOnly};
pub use model::member::{Member, MemberId};
pub use model::team::{Team, TeamId};
pub use model::Entity;
pub use query::{
    BindError, Page, PageRequest, QueryArg, QueryEngine, QueryError, QueryMethod, QueryResult,
    RepositoryRegistry, ResolutionError, Slice, Sort,
};
pub use repo::{default_registry, MemberRepository, TeamRepository};
pub use schema::{EntitySchema, Property, PropertyKind, SchemaError, SchemaRegistry};
pub use service::member_service::MemberService;
pub use session::{PersistenceSession, SqliteSession};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

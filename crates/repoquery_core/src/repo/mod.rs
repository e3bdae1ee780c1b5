//! Repositories over the query engine.
//!
//! # Responsibility
//! - Declare each repository method as static `QueryMethod` metadata.
//! - Expose typed methods that run those declarations through one session.
//!
//! # Invariants
//! - Declarations are `const`; the engine resolves each one once per
//!   registry and reuses the descriptor on every later call.

use crate::model::member::Member;
use crate::model::team::Team;
use crate::model::Entity;
use crate::query::registry::RepositoryRegistry;
use crate::schema::SchemaError;

pub mod member_repo;
pub mod team_repo;

pub use member_repo::MemberRepository;
pub use team_repo::TeamRepository;

/// Named query resolved by `MemberRepository::find_by_username`.
pub const MEMBER_FIND_BY_USERNAME: &str = "select m from Member m where m.username = :username";

/// Registry with the `Member` and `Team` schemas and their named queries.
pub fn default_registry() -> Result<RepositoryRegistry, SchemaError> {
    RepositoryRegistry::builder()
        .entity(Member::schema().clone())
        .entity(Team::schema().clone())
        .named_query("Member.findByUsername", MEMBER_FIND_BY_USERNAME)
        .build()
}

//! Team repository.

use crate::model::member::Member;
use crate::model::team::{Team, TeamId};
use crate::query::engine::QueryEngine;
use crate::query::error::QueryResult;
use crate::query::method::{Param, QueryMethod, ReturnShape};
use crate::query::registry::RepositoryRegistry;
use crate::query_args;
use crate::session::PersistenceSession;

/// Teams with every member, one value per team.
pub const FIND_ALL_WITH_MEMBERS: QueryMethod =
    QueryMethod::new("Team", "findAllWithMembers", ReturnShape::List)
        .query("select distinct t from Team t left join fetch t.members");

pub const MEMBERS_OF: QueryMethod = QueryMethod::new("Member", "findByTeam", ReturnShape::List)
    .params(&[Param::id("team")])
    .query("select m from Member m where m.team = :team order by m.username");

pub struct TeamRepository<'a, S: PersistenceSession> {
    engine: QueryEngine<'a, S>,
}

impl<'a, S: PersistenceSession> TeamRepository<'a, S> {
    pub fn new(registry: &'a RepositoryRegistry, session: &'a S) -> Self {
        Self {
            engine: QueryEngine::new(registry, session),
        }
    }

    /// Stores the team row only; members are saved through their own
    /// repository.
    pub fn save(&self, team: &Team) -> QueryResult<TeamId> {
        Ok(self.engine.session().save(team)?)
    }

    pub fn find_by_id(&self, id: TeamId) -> QueryResult<Option<Team>> {
        self.engine.session().find_by_id(id)
    }

    pub fn find_all_with_members(&self) -> QueryResult<Vec<Team>> {
        self.engine.find_list(&FIND_ALL_WITH_MEMBERS, query_args![])
    }

    pub fn members_of(&self, team: TeamId) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&MEMBERS_OF, query_args![team])
    }
}

//! Member repository: CRUD plus the declared query methods.

use crate::model::dto::{MemberDto, MemberProjection};
use crate::model::member::{Member, MemberId};
use crate::query::engine::QueryEngine;
use crate::query::error::QueryResult;
use crate::query::method::{LockMode, Param, ProjectionTarget, QueryMethod, ReturnShape};
use crate::query::page::{Page, PageRequest, Slice};
use crate::query::registry::RepositoryRegistry;
use crate::query::row::Projection;
use crate::query_args;
use crate::session::PersistenceSession;

const ENTITY: &str = "Member";
const USERNAME: &[Param] = &[Param::text("username")];
const AGE: &[Param] = &[Param::integer("age")];

pub const FIND_ALL: QueryMethod =
    QueryMethod::new(ENTITY, "findAll", ReturnShape::List).fetch(&["team"]);

pub const FIND_ALL_PAGED: QueryMethod =
    QueryMethod::new(ENTITY, "findAll", ReturnShape::Page).fetch(&["team"]);

pub const FIND_BY_USERNAME_AND_AGE_GREATER_THAN: QueryMethod =
    QueryMethod::new(ENTITY, "findByUsernameAndAgeGreaterThan", ReturnShape::List)
        .params(&[Param::text("username"), Param::integer("age")]);

pub const FIND_USER: QueryMethod = QueryMethod::new(ENTITY, "findUser", ReturnShape::List)
    .params(&[Param::text("username"), Param::integer("age")])
    .query("select m from Member m where m.username = :username and m.age = :age");

pub const FIND_USERNAME_LIST: QueryMethod =
    QueryMethod::new(ENTITY, "findUsernameList", ReturnShape::List)
        .query("select m.username from Member m");

pub const FIND_MEMBER_DTO: QueryMethod = QueryMethod::new(ENTITY, "findMemberDto", ReturnShape::List)
    .query("select new MemberDto(m.id, m.username, t.name) from Member m join m.team t")
    .projection(ProjectionTarget::new(MemberDto::NAME, MemberDto::FIELDS));

pub const FIND_MEMBERS: QueryMethod = QueryMethod::new(ENTITY, "findMembers", ReturnShape::One)
    .params(&[Param::text("name")])
    .query("select m from Member m where m.username = :name");

pub const FIND_BY_NAMES: QueryMethod = QueryMethod::new(ENTITY, "findByNames", ReturnShape::List)
    .params(&[Param::text_list("names")])
    .query("select m from Member m where m.username in :names");

pub const FIND_BY_AGE: QueryMethod = QueryMethod::new(ENTITY, "findByAge", ReturnShape::Page)
    .params(AGE)
    .query("select m from Member m left join m.team t where m.age = :age");

pub const FIND_SLICE_BY_AGE: QueryMethod =
    QueryMethod::new(ENTITY, "findSliceByAge", ReturnShape::Slice).params(AGE);

pub const BULK_AGE_PLUS: QueryMethod = QueryMethod::new(ENTITY, "bulkAgePlus", ReturnShape::RowCount)
    .params(AGE)
    .query("update Member m set m.age = m.age + 1 where m.age >= :age")
    .modifying();

pub const FIND_MEMBER_FETCH_JOIN: QueryMethod =
    QueryMethod::new(ENTITY, "findMemberFetchJoin", ReturnShape::List)
        .query("select m from Member m left join fetch m.team t");

pub const FIND_MEMBER_ENTITY_GRAPH: QueryMethod =
    QueryMethod::new(ENTITY, "findMemberEntityGraph", ReturnShape::List)
        .query("select m from Member m")
        .fetch(&["team"]);

/// Resolved through the `Member.findByUsername` named query.
pub const FIND_BY_USERNAME: QueryMethod =
    QueryMethod::new(ENTITY, "findByUsername", ReturnShape::List)
        .params(USERNAME)
        .fetch(&["team"]);

pub const FIND_READ_ONLY_BY_USERNAME: QueryMethod =
    QueryMethod::new(ENTITY, "findReadOnlyByUsername", ReturnShape::One)
        .params(USERNAME)
        .read_only();

pub const FIND_LOCKED_BY_USERNAME: QueryMethod =
    QueryMethod::new(ENTITY, "findLockedByUsername", ReturnShape::List)
        .params(USERNAME)
        .lock(LockMode::PessimisticWrite);

/// Projection is chosen per call; see `find_projections_by_username`.
pub const FIND_PROJECTIONS_BY_USERNAME: QueryMethod =
    QueryMethod::new(ENTITY, "findProjectionsByUsername", ReturnShape::List).params(USERNAME);

pub const FIND_BY_NATIVE_QUERY: QueryMethod =
    QueryMethod::new(ENTITY, "findByNativeQuery", ReturnShape::One)
        .params(USERNAME)
        .native("select * from member where username = ?");

pub const FIND_BY_NATIVE_PROJECTION: QueryMethod =
    QueryMethod::new(ENTITY, "findByNativeProjection", ReturnShape::Page)
        .native_with_count(
            "select m.member_id as id, m.username, t.name as teamName \
             from member m left join team t on m.team_id = t.team_id",
            "select count(*) from member",
        )
        .projection(ProjectionTarget::new(
            MemberProjection::NAME,
            MemberProjection::FIELDS,
        ));

pub const COUNT_BY_AGE: QueryMethod =
    QueryMethod::new(ENTITY, "countByAge", ReturnShape::One).params(AGE);

pub const FIND_BY_AGE_ORDER_BY_USERNAME_DESC: QueryMethod =
    QueryMethod::new(ENTITY, "findByAgeOrderByUsernameDesc", ReturnShape::List).params(AGE);

pub struct MemberRepository<'a, S: PersistenceSession> {
    engine: QueryEngine<'a, S>,
}

impl<'a, S: PersistenceSession> MemberRepository<'a, S> {
    pub fn new(registry: &'a RepositoryRegistry, session: &'a S) -> Self {
        Self {
            engine: QueryEngine::new(registry, session),
        }
    }

    pub fn save(&self, member: &Member) -> QueryResult<MemberId> {
        Ok(self.engine.session().save(member)?)
    }

    pub fn find_by_id(&self, id: MemberId) -> QueryResult<Option<Member>> {
        self.engine.session().find_by_id(id)
    }

    pub fn delete(&self, id: MemberId) -> QueryResult<bool> {
        Ok(self.engine.session().delete::<Member>(id)?)
    }

    pub fn count(&self) -> QueryResult<u64> {
        Ok(self.engine.session().count::<Member>()?)
    }

    /// Every member with its team loaded.
    pub fn find_all(&self) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&FIND_ALL, query_args![])
    }

    pub fn find_all_paged(&self, page: &PageRequest) -> QueryResult<Page<Member>> {
        self.engine.find_page(&FIND_ALL_PAGED, query_args![], page)
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        age: i64,
    ) -> QueryResult<Vec<Member>> {
        self.engine.find_list(
            &FIND_BY_USERNAME_AND_AGE_GREATER_THAN,
            query_args![username, age],
        )
    }

    pub fn find_user(&self, username: &str, age: i64) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&FIND_USER, query_args![username, age])
    }

    pub fn find_username_list(&self) -> QueryResult<Vec<String>> {
        self.engine.find_list(&FIND_USERNAME_LIST, query_args![])
    }

    pub fn find_member_dto(&self) -> QueryResult<Vec<MemberDto>> {
        self.engine.find_list(&FIND_MEMBER_DTO, query_args![])
    }

    pub fn find_members(&self, name: &str) -> QueryResult<Option<Member>> {
        self.engine.find_one(&FIND_MEMBERS, query_args![name])
    }

    pub fn find_by_names(&self, names: &[&str]) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&FIND_BY_NAMES, query_args![names])
    }

    pub fn find_by_age(&self, age: i64, page: &PageRequest) -> QueryResult<Page<Member>> {
        self.engine.find_page(&FIND_BY_AGE, query_args![age], page)
    }

    pub fn find_slice_by_age(&self, age: i64, page: &PageRequest) -> QueryResult<Slice<Member>> {
        self.engine
            .find_slice(&FIND_SLICE_BY_AGE, query_args![age], page)
    }

    /// Adds one to the age of every member at least `age` old.
    ///
    /// Loaded members of this session are marked stale afterwards.
    pub fn bulk_age_plus(&self, age: i64) -> QueryResult<usize> {
        self.engine.execute_update(&BULK_AGE_PLUS, query_args![age])
    }

    pub fn find_member_fetch_join(&self) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&FIND_MEMBER_FETCH_JOIN, query_args![])
    }

    pub fn find_member_entity_graph(&self) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&FIND_MEMBER_ENTITY_GRAPH, query_args![])
    }

    pub fn find_by_username(&self, username: &str) -> QueryResult<Vec<Member>> {
        self.engine.find_list(&FIND_BY_USERNAME, query_args![username])
    }

    /// Loads without entering the session working set.
    pub fn find_read_only_by_username(&self, username: &str) -> QueryResult<Option<Member>> {
        self.engine
            .find_one(&FIND_READ_ONLY_BY_USERNAME, query_args![username])
    }

    /// Holds the write lock on matching rows until the caller's
    /// transaction ends.
    pub fn find_locked_by_username(&self, username: &str) -> QueryResult<Vec<Member>> {
        self.engine
            .find_list(&FIND_LOCKED_BY_USERNAME, query_args![username])
    }

    pub fn find_projections_by_username<P: Projection>(
        &self,
        username: &str,
    ) -> QueryResult<Vec<P>> {
        let method = FIND_PROJECTIONS_BY_USERNAME.projection(P::target());
        self.engine.find_list(&method, query_args![username])
    }

    pub fn find_by_native_query(&self, username: &str) -> QueryResult<Option<Member>> {
        self.engine
            .find_one(&FIND_BY_NATIVE_QUERY, query_args![username])
    }

    pub fn find_by_native_projection(
        &self,
        page: &PageRequest,
    ) -> QueryResult<Page<MemberProjection>> {
        self.engine
            .find_page(&FIND_BY_NATIVE_PROJECTION, query_args![], page)
    }

    pub fn count_by_age(&self, age: i64) -> QueryResult<u64> {
        self.engine.count(&COUNT_BY_AGE, query_args![age])
    }

    pub fn find_by_age_order_by_username_desc(&self, age: i64) -> QueryResult<Vec<Member>> {
        self.engine
            .find_list(&FIND_BY_AGE_ORDER_BY_USERNAME_DESC, query_args![age])
    }
}

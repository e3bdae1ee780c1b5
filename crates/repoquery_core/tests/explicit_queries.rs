use repoquery_core::db::open_db_in_memory;
use repoquery_core::query::{Param, QueryError, QueryMethod, ResolutionError, ReturnShape, Strategy};
use repoquery_core::repo::member_repo::{
    FIND_BY_NATIVE_PROJECTION, FIND_BY_NATIVE_QUERY, FIND_MEMBER_DTO, FIND_USER,
};
use repoquery_core::{
    default_registry, query_args, Member, MemberDto, MemberRepository, PageRequest, PersistenceSession,
    QueryEngine, SqliteSession, Team, TeamRepository, UsernameOnly,
};
use std::collections::HashSet;

struct Fixture {
    team: Team,
    with_team: Member,
    without_team: Member,
}

fn seed(teams: &TeamRepository<'_, SqliteSession<'_>>, repo: &MemberRepository<'_, SqliteSession<'_>>) -> Fixture {
    let team = Team::new("teamA");
    teams.save(&team).unwrap();
    let with_team = Member::with_team("AAA", 10, &team);
    let without_team = Member::with_age("BBB", 20);
    repo.save(&with_team).unwrap();
    repo.save(&without_team).unwrap();
    Fixture {
        team,
        with_team,
        without_team,
    }
}

#[test]
fn explicit_text_binds_named_parameters() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    let fixture = seed(&teams, &repo);

    let found = repo.find_user("AAA", 10).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, fixture.with_team.id);
    assert!(repo.find_user("AAA", 11).unwrap().is_empty());
    assert_eq!(
        registry.resolve(&FIND_USER).unwrap().strategy,
        Strategy::Explicit
    );
}

#[test]
fn scalar_and_constructor_projections() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    let fixture = seed(&teams, &repo);

    let names = repo.find_username_list().unwrap();
    let names = names.iter().map(String::as_str).collect::<HashSet<_>>();
    assert_eq!(names, HashSet::from(["AAA", "BBB"]));

    let dtos = repo.find_member_dto().unwrap();
    assert_eq!(
        dtos,
        vec![MemberDto {
            id: fixture.with_team.id,
            username: "AAA".to_string(),
            team_name: Some(fixture.team.name.clone()),
        }]
    );
    assert_eq!(
        registry.resolve(&FIND_MEMBER_DTO).unwrap().projection.map(|target| target.name),
        Some("MemberDto")
    );

    let json = serde_json::to_value(&dtos[0]).unwrap();
    assert_eq!(json["teamName"], "teamA");
}

#[test]
fn collection_parameter_expands_in_list() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    seed(&teams, &repo);
    repo.save(&Member::with_age("CCC", 30)).unwrap();

    let found = repo.find_by_names(&["AAA", "CCC"]).unwrap();
    let names = found
        .iter()
        .map(|member| member.username.as_str())
        .collect::<HashSet<_>>();
    assert_eq!(names, HashSet::from(["AAA", "CCC"]));
    assert!(repo.find_by_names(&[]).unwrap().is_empty());
}

#[test]
fn empty_not_in_list_keeps_every_row() {
    const EXCLUDING: QueryMethod = QueryMethod::new("Member", "findExcluding", ReturnShape::List)
        .params(&[Param::text_list("names")])
        .query("select m from Member m where m.username not in :names");

    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    seed(&teams, &repo);
    let engine = QueryEngine::new(&registry, &session);

    let everyone = engine
        .find_list::<Member>(&EXCLUDING, query_args![Vec::<&str>::new()])
        .unwrap();
    assert_eq!(everyone.len(), 2);

    let others = engine
        .find_list::<Member>(&EXCLUDING, query_args![vec!["AAA"]])
        .unwrap();
    let names = others
        .iter()
        .map(|member| member.username.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["BBB"]);
}

#[test]
fn single_result_is_optional_and_rejects_duplicates() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    let fixture = seed(&teams, &repo);

    let found = repo.find_members("BBB").unwrap().unwrap();
    assert_eq!(found.id, fixture.without_team.id);
    assert!(found.team_id.is_none());
    assert!(repo.find_members("nobody").unwrap().is_none());

    repo.save(&Member::with_age("BBB", 21)).unwrap();
    let err = repo.find_members("BBB").unwrap_err();
    assert!(matches!(err, QueryError::TooManyResults { count: 2, .. }));
}

#[test]
fn named_query_loads_the_team_graph() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    seed(&teams, &repo);

    let found = repo.find_by_username("AAA").unwrap();
    assert_eq!(found.len(), 1);
    let team = found[0].team.as_ref().unwrap();
    assert_eq!(team.name, "teamA");

    let without = repo.find_by_username("BBB").unwrap();
    assert!(without[0].team.is_none());
}

#[test]
fn native_single_result_maps_entity_columns() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    let fixture = seed(&teams, &repo);
    session.clear();

    let found = repo.find_by_native_query("AAA").unwrap().unwrap();
    assert_eq!(found.id, fixture.with_team.id);
    assert_eq!(found.age, 10);
    assert_eq!(found.team_id, Some(fixture.team.id));
    assert!(session.is_tracked("Member", found.id));
    assert_eq!(
        registry.resolve(&FIND_BY_NATIVE_QUERY).unwrap().strategy,
        Strategy::Native
    );
}

#[test]
fn native_projection_page_runs_its_count_text() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    seed(&teams, &repo);

    let page = repo
        .find_by_native_projection(&PageRequest::of(0, 1).unwrap())
        .unwrap();
    assert_eq!(page.content().len(), 1);
    assert_eq!(page.total_elements(), 2);
    assert_eq!(page.total_pages(), 2);
    assert!(page.has_next());

    let everything = repo
        .find_by_native_projection(&PageRequest::of(0, 10).unwrap())
        .unwrap();
    let team_names = everything
        .content()
        .iter()
        .map(|row| (row.username.as_str(), row.team_name.as_deref()))
        .collect::<HashSet<_>>();
    assert_eq!(
        team_names,
        HashSet::from([("AAA", Some("teamA")), ("BBB", None)])
    );
    assert!(registry
        .resolve(&FIND_BY_NATIVE_PROJECTION)
        .unwrap()
        .projection
        .is_some());
}

#[test]
fn dynamic_projection_is_chosen_per_call() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let repo = MemberRepository::new(&registry, &session);
    seed(&teams, &repo);

    let usernames = repo
        .find_projections_by_username::<UsernameOnly>("AAA")
        .unwrap();
    assert_eq!(
        usernames,
        vec![UsernameOnly {
            username: "AAA".to_string()
        }]
    );

    let err = repo
        .find_projections_by_username::<MemberDto>("AAA")
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Resolution(ResolutionError::AmbiguousOrInvalid { .. })
    ));
}

use repoquery_core::db::open_db_in_memory;
use repoquery_core::query::{
    BindError, Param, QueryError, QueryMethod, ResolutionError, ReturnShape, Strategy,
};
use repoquery_core::repo::member_repo::{
    COUNT_BY_AGE, FIND_BY_AGE_ORDER_BY_USERNAME_DESC, FIND_BY_USERNAME,
    FIND_BY_USERNAME_AND_AGE_GREATER_THAN,
};
use repoquery_core::{
    default_registry, query_args, Entity, Member, MemberRepository, QueryEngine,
    RepositoryRegistry, SqliteSession, Team,
};

fn seed(repo: &MemberRepository<'_, SqliteSession<'_>>) {
    repo.save(&Member::with_age("AAA", 10)).unwrap();
    repo.save(&Member::with_age("AAA", 20)).unwrap();
    repo.save(&Member::with_age("BBB", 10)).unwrap();
}

#[test]
fn derived_name_filters_by_every_clause() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);
    seed(&repo);

    let result = repo.find_by_username_and_age_greater_than("AAA", 15).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].username, "AAA");
    assert_eq!(result[0].age, 20);

    let descriptor = registry
        .resolve(&FIND_BY_USERNAME_AND_AGE_GREATER_THAN)
        .unwrap();
    assert_eq!(descriptor.strategy, Strategy::Derived);
    assert_eq!(descriptor.parameters.len(), 2);
}

#[test]
fn derived_count_and_order_by() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);
    seed(&repo);

    assert_eq!(repo.count_by_age(10).unwrap(), 2);
    assert_eq!(repo.count_by_age(99).unwrap(), 0);

    let ordered = repo.find_by_age_order_by_username_desc(10).unwrap();
    let names = ordered
        .iter()
        .map(|member| member.username.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["BBB", "AAA"]);

    assert_eq!(
        registry.resolve(&COUNT_BY_AGE).unwrap().strategy,
        Strategy::Derived
    );
    assert_eq!(
        registry
            .resolve(&FIND_BY_AGE_ORDER_BY_USERNAME_DESC)
            .unwrap()
            .strategy,
        Strategy::Derived
    );
}

#[test]
fn named_query_wins_over_the_derived_name() {
    let registry = default_registry().unwrap();
    let descriptor = registry.resolve(&FIND_BY_USERNAME).unwrap();
    assert_eq!(descriptor.strategy, Strategy::Named);
    assert_eq!(descriptor.fetch_paths.len(), 1);
}

#[test]
fn unknown_property_fails_on_every_call() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let engine = QueryEngine::new(&registry, &session);

    const BY_NICKNAME: QueryMethod =
        QueryMethod::new("Member", "findByNickname", ReturnShape::List);
    for _ in 0..2 {
        let err = engine
            .find_list::<Member>(&BY_NICKNAME, query_args!["AAA"])
            .unwrap_err();
        match err {
            QueryError::Resolution(ResolutionError::UnknownProperty { entity, property }) => {
                assert_eq!(entity, "Member");
                assert_eq!(property, "Nickname");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(registry.cached_len(), 1);
}

#[test]
fn wrong_arguments_are_bind_errors() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let engine = QueryEngine::new(&registry, &session);

    let arity = engine
        .find_list::<Member>(&FIND_BY_USERNAME_AND_AGE_GREATER_THAN, query_args!["AAA"])
        .unwrap_err();
    assert!(matches!(
        arity,
        QueryError::Bind(BindError::ArityMismatch {
            expected: 2,
            actual: 1
        })
    ));

    let wrong_type = engine
        .find_list::<Member>(
            &FIND_BY_USERNAME_AND_AGE_GREATER_THAN,
            query_args!["AAA", "fifteen"],
        )
        .unwrap_err();
    assert!(matches!(
        wrong_type,
        QueryError::Bind(BindError::TypeMismatch { index: 1, .. })
    ));
}

#[test]
fn invoking_with_a_different_shape_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let engine = QueryEngine::new(&registry, &session);

    let err = engine
        .find_one::<Member>(&FIND_BY_USERNAME_AND_AGE_GREATER_THAN, query_args!["AAA", 1])
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Resolution(ResolutionError::AmbiguousOrInvalid { .. })
    ));
}

#[test]
fn derived_in_and_not_in_take_lists() {
    const BY_NAMES: QueryMethod = QueryMethod::new("Member", "findByUsernameIn", ReturnShape::List)
        .params(&[Param::text_list("names")]);
    const EXCLUDING_NAMES: QueryMethod =
        QueryMethod::new("Member", "findByUsernameNotIn", ReturnShape::List)
            .params(&[Param::text_list("names")]);

    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);
    seed(&repo);
    repo.save(&Member::with_age("CCC", 30)).unwrap();
    let engine = QueryEngine::new(&registry, &session);

    let usernames = |members: Vec<Member>| {
        let mut names = members
            .into_iter()
            .map(|member| member.username)
            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    };

    let found = engine
        .find_list::<Member>(&BY_NAMES, query_args![vec!["AAA", "CCC"]])
        .unwrap();
    assert_eq!(usernames(found), vec!["AAA", "AAA", "CCC"]);

    let rest = engine
        .find_list::<Member>(&EXCLUDING_NAMES, query_args![vec!["AAA", "CCC"]])
        .unwrap();
    assert_eq!(usernames(rest), vec!["BBB"]);

    let none = engine
        .find_list::<Member>(&BY_NAMES, query_args![Vec::<&str>::new()])
        .unwrap();
    assert!(none.is_empty());

    let all = engine
        .find_list::<Member>(&EXCLUDING_NAMES, query_args![Vec::<&str>::new()])
        .unwrap();
    assert_eq!(all.len(), 4);

    let scalar = engine
        .find_list::<Member>(&BY_NAMES, query_args!["AAA"])
        .unwrap_err();
    assert!(matches!(
        scalar,
        QueryError::Bind(BindError::TypeMismatch { index: 0, .. })
    ));
}

#[test]
fn derived_name_without_a_named_query() {
    let conn = open_db_in_memory().unwrap();
    let registry = RepositoryRegistry::builder()
        .entity(Member::schema().clone())
        .entity(Team::schema().clone())
        .build()
        .unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);
    seed(&repo);

    let descriptor = registry.resolve(&FIND_BY_USERNAME).unwrap();
    assert_eq!(descriptor.strategy, Strategy::Derived);

    let found = repo.find_by_username("BBB").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].age, 10);
}

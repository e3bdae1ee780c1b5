use repoquery_core::db::open_db_in_memory;
use repoquery_core::query::{QueryError, QueryMethod, ResolutionError, ReturnShape};
use repoquery_core::repo::member_repo::BULK_AGE_PLUS;
use repoquery_core::{
    default_registry, query_args, Member, MemberRepository, PersistenceSession, QueryEngine,
    SqliteSession,
};

#[test]
fn bulk_update_reports_affected_rows() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);

    for (index, age) in [10, 19, 20, 21, 40].into_iter().enumerate() {
        repo.save(&Member::with_age(format!("member{}", index + 1), age))
            .unwrap();
    }

    assert_eq!(repo.bulk_age_plus(20).unwrap(), 3);

    let mut ages = repo
        .find_all()
        .unwrap()
        .into_iter()
        .map(|member| member.age)
        .collect::<Vec<_>>();
    ages.sort_unstable();
    assert_eq!(ages, vec![10, 19, 21, 22, 41]);

    assert_eq!(repo.bulk_age_plus(100).unwrap(), 0);
}

#[test]
fn loaded_members_are_stale_until_reloaded() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);

    let member = Member::with_age("member5", 40);
    repo.save(&member).unwrap();
    let loaded = repo.find_by_id(member.id).unwrap().unwrap();
    assert!(!session.is_stale("Member", member.id));

    repo.bulk_age_plus(20).unwrap();

    assert!(session.is_stale("Member", member.id));
    assert_eq!(loaded.age, 40);

    let reloaded = repo.find_by_id(member.id).unwrap().unwrap();
    assert_eq!(reloaded.age, 41);
    assert!(!session.is_stale("Member", member.id));
}

#[test]
fn clearing_the_session_detaches_stale_entries() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);

    let member = Member::with_age("member1", 30);
    repo.save(&member).unwrap();
    repo.bulk_age_plus(20).unwrap();
    assert!(session.is_stale("Member", member.id));

    session.flush().unwrap();
    session.clear();
    assert!(!session.is_tracked("Member", member.id));
    assert!(!session.is_stale("Member", member.id));
}

#[test]
fn update_text_requires_the_modifying_flag() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let engine = QueryEngine::new(&registry, &session);

    const UNFLAGGED: QueryMethod = QueryMethod::new("Member", "agePlus", ReturnShape::RowCount)
        .params(BULK_AGE_PLUS.params)
        .query("update Member m set m.age = m.age + 1 where m.age >= :age");

    let err = engine
        .execute_update(&UNFLAGGED, query_args![20])
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Resolution(ResolutionError::AmbiguousOrInvalid { .. })
    ));
}

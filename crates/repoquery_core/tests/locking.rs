use repoquery_core::db::{open_db, open_db_in_memory, open_db_with_options, StoreOptions};
use repoquery_core::query::{LockMode, QueryError};
use repoquery_core::repo::member_repo::FIND_LOCKED_BY_USERNAME;
use repoquery_core::{
    default_registry, Member, MemberRepository, PersistenceSession, RepositoryRegistry,
    SqliteSession,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const HOLD_FOR: Duration = Duration::from_millis(300);

fn seed(path: &Path, registry: &RepositoryRegistry) {
    let conn = open_db(path).unwrap();
    let session = SqliteSession::new(&conn);
    MemberRepository::new(registry, &session)
        .save(&Member::with_age("member1", 10))
        .unwrap();
}

/// Locks `member1`, signals, holds the lock, then bumps the age and commits.
fn hold_lock(conn: Connection, registry: &RepositoryRegistry, locked: mpsc::Sender<()>) {
    let tx = conn.unchecked_transaction().unwrap();
    {
        let session = SqliteSession::new(&tx);
        let repo = MemberRepository::new(registry, &session);
        let mut member = repo.find_locked_by_username("member1").unwrap().remove(0);
        locked.send(()).unwrap();
        thread::sleep(HOLD_FOR);
        member.age += 1;
        repo.save(&member).unwrap();
    }
    tx.commit().unwrap();
}

#[test]
fn pessimistic_write_waits_for_the_holder_to_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locking.db");
    let registry = default_registry().unwrap();
    seed(&path, &registry);

    let holder_conn = open_db(&path).unwrap();
    let waiter_conn = open_db(&path).unwrap();
    let (locked_tx, locked_rx) = mpsc::channel();

    let (age, waited) = thread::scope(|scope| {
        let registry = &registry;
        let holder = scope.spawn(move || hold_lock(holder_conn, registry, locked_tx));
        let waiter = scope.spawn(move || {
            locked_rx.recv().unwrap();
            let started = Instant::now();
            let tx = waiter_conn.unchecked_transaction().unwrap();
            let age = {
                let session = SqliteSession::new(&tx);
                let repo = MemberRepository::new(registry, &session);
                repo.find_locked_by_username("member1").unwrap()[0].age
            };
            let waited = started.elapsed();
            tx.commit().unwrap();
            (age, waited)
        });
        holder.join().unwrap();
        waiter.join().unwrap()
    });

    assert_eq!(age, 11, "second locker must observe the committed update");
    assert!(
        waited >= HOLD_FOR / 2,
        "second locker returned after {waited:?} without waiting"
    );
}

#[test]
fn lock_wait_past_busy_timeout_is_a_lock_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timeout.db");
    let registry = default_registry().unwrap();
    seed(&path, &registry);

    let holder_conn = open_db(&path).unwrap();
    let impatient = StoreOptions {
        busy_timeout: Duration::from_millis(50),
        ..StoreOptions::default()
    };
    let waiter_conn = open_db_with_options(&path, &impatient).unwrap();
    let (locked_tx, locked_rx) = mpsc::channel();

    let timed_out = thread::scope(|scope| {
        let registry = &registry;
        let holder = scope.spawn(move || hold_lock(holder_conn, registry, locked_tx));
        let waiter = scope.spawn(move || {
            locked_rx.recv().unwrap();
            let tx = waiter_conn.unchecked_transaction().unwrap();
            let session = SqliteSession::new(&tx);
            let repo = MemberRepository::new(registry, &session);
            let err = repo.find_locked_by_username("member1").unwrap_err();
            err.is_lock_timeout()
        });
        holder.join().unwrap();
        waiter.join().unwrap()
    });

    assert!(timed_out);
}

#[test]
fn pessimistic_write_outside_a_transaction_is_refused() {
    let conn = open_db_in_memory().unwrap();
    let registry = default_registry().unwrap();
    let session = SqliteSession::new(&conn);
    let repo = MemberRepository::new(&registry, &session);
    let member = Member::with_age("member1", 10);
    repo.save(&member).unwrap();
    let tracked_before = session.tracked_len();

    let err = repo.find_locked_by_username("member1").unwrap_err();
    assert!(matches!(
        err,
        QueryError::TransactionRequired { ref method } if method == "Member.findLockedByUsername"
    ));
    assert!(!err.is_lock_timeout());
    assert_eq!(session.tracked_len(), tracked_before);

    let tx = conn.unchecked_transaction().unwrap();
    {
        let session = SqliteSession::new(&tx);
        let repo = MemberRepository::new(&registry, &session);
        let locked = repo.find_locked_by_username("member1").unwrap();
        assert_eq!(locked.len(), 1);
    }
    tx.commit().unwrap();
}

#[test]
fn locked_lookup_is_declared_under_its_repository_name() {
    let registry = default_registry().unwrap();
    let descriptor = registry.resolve(&FIND_LOCKED_BY_USERNAME).unwrap();
    assert_eq!(descriptor.method_name(), "Member.findLockedByUsername");
    assert_eq!(descriptor.lock, LockMode::PessimisticWrite);
}

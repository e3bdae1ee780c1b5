use repoquery_core::query::{QueryDescriptor, QueryMethod, ResolutionError, ReturnShape};
use repoquery_core::repo::member_repo::{
    BULK_AGE_PLUS, COUNT_BY_AGE, FIND_ALL, FIND_ALL_PAGED, FIND_BY_USERNAME, FIND_USER,
};
use repoquery_core::default_registry;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

#[test]
fn concurrent_first_calls_share_one_descriptor_per_method() {
    let registry = default_registry().unwrap();
    let methods = [FIND_USER, FIND_ALL, FIND_ALL_PAGED, FIND_BY_USERNAME, COUNT_BY_AGE, BULK_AGE_PLUS];
    let barrier = Barrier::new(THREADS);

    let resolved: Vec<Vec<Arc<QueryDescriptor>>> = thread::scope(|scope| {
        let handles = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    methods
                        .iter()
                        .map(|method| registry.resolve(method).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(registry.cached_len(), methods.len());
    for per_thread in &resolved[1..] {
        for (first, other) in resolved[0].iter().zip(per_thread) {
            assert!(Arc::ptr_eq(first, other));
        }
    }
}

#[test]
fn same_name_with_different_shape_is_a_separate_entry() {
    let registry = default_registry().unwrap();
    let list = registry.resolve(&FIND_ALL).unwrap();
    let page = registry.resolve(&FIND_ALL_PAGED).unwrap();
    assert!(!Arc::ptr_eq(&list, &page));
    assert_eq!(registry.cached_len(), 2);

    let again = registry.resolve(&FIND_ALL).unwrap();
    assert!(Arc::ptr_eq(&list, &again));
    assert_eq!(registry.cached_len(), 2);
}

#[test]
fn concurrent_failures_are_cached_once() {
    const BROKEN: QueryMethod = QueryMethod::new("Member", "findByNickname", ReturnShape::List);
    let registry = default_registry().unwrap();
    let barrier = Barrier::new(THREADS);

    let errors: Vec<ResolutionError> = thread::scope(|scope| {
        let handles = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    registry.resolve(&BROKEN).unwrap_err()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(registry.cached_len(), 1);
    assert!(errors.iter().all(|err| *err == errors[0]));
}

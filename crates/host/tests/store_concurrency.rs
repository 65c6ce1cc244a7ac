//! First-admin atomicity under concurrent registrations
//!
//! Several threads race to register the first account against the same
//! database file; the exclusive transaction must leave exactly one admin.

use std::sync::{Arc, Barrier};

use termgate_host::store::Store;

#[test]
fn test_exactly_one_first_admin_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("race.db");
    // Create the schema before the race starts.
    drop(Store::open(&db_path).unwrap());

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let barrier = barrier.clone();
            let db_path = db_path.clone();
            std::thread::spawn(move || {
                let store = Store::open(&db_path).unwrap();
                barrier.wait();
                store
                    .register_principal(&format!("user-{i}"), None, "hash")
                    .map(|p| p.is_admin)
            })
        })
        .collect();

    let mut admins = 0;
    let mut registered = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(is_admin) => {
                registered += 1;
                if is_admin {
                    admins += 1;
                }
            }
            Err(e) => panic!("registration failed: {e}"),
        }
    }
    assert_eq!(registered, threads);
    assert_eq!(admins, 1, "exactly one principal may become the first admin");

    let store = Store::open(&db_path).unwrap();
    assert!(store.admin_exists().unwrap());
}

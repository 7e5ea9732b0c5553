//! Several threads share one persistent set under a [`ResourceLock`].
//!
//! Writers always add members in pairs while holding the lock exclusively.
//! Readers hold it shared and must never observe half of a pair.

#![allow(clippy::expect_used)]

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::resource::{LockError, LockStatus, ResourceLock};
use crate::storage::{MemoryStore, ObjectStore, PersistentSet};

const WRITERS: u64 = 3;
const PAIRS_PER_WRITER: u64 = 40;
const READERS: usize = 4;

fn shared_set() -> (Mutex<MemoryStore>, PersistentSet) {
    let mut store = MemoryStore::new();
    let set = PersistentSet::create(&mut store, 6).expect("create set");
    store.commit().expect("commit");
    (Mutex::new(store), set)
}

#[test]
fn test_readers_never_see_half_a_pair() {
    let (store, set) = shared_set();
    let lock = ResourceLock::new();

    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let (store, lock) = (&store, &lock);
            scope.spawn(move || {
                for pair in 0..PAIRS_PER_WRITER {
                    let first = 1 + 2 * (writer * PAIRS_PER_WRITER + pair);
                    let _guard = lock.exclusive().expect("exclusive");
                    set.add(&mut *store.lock().expect("store"), first)
                        .expect("add first");
                    thread::yield_now();
                    set.add(&mut *store.lock().expect("store"), first + 1)
                        .expect("add second");
                }
            });
        }
        for _ in 0..READERS {
            let (store, lock) = (&store, &lock);
            scope.spawn(move || {
                for _ in 0..50 {
                    let _guard = lock.shared().expect("shared");
                    let len = set.len(&*store.lock().expect("store")).expect("len");
                    assert_eq!(len % 2, 0, "reader saw {len} members");
                    thread::yield_now();
                }
            });
        }
    });

    assert_eq!(lock.status(), LockStatus::Free);
    let store = store.into_inner().expect("store");
    assert_eq!(
        set.len(&store).expect("len"),
        2 * WRITERS * PAIRS_PER_WRITER
    );
}

#[test]
fn test_writer_gives_up_while_readers_hold() {
    let (store, set) = shared_set();
    let lock = ResourceLock::new();
    let guard = lock.shared().expect("shared");

    thread::scope(|scope| {
        let (store, lock) = (&store, &lock);
        let writer = scope.spawn(move || {
            match lock.exclusive_for(Duration::from_millis(100)) {
                Err(LockError::Timeout { .. }) => false,
                Ok(_guard) => set
                    .add(&mut *store.lock().expect("store"), 1)
                    .expect("add"),
                Err(e) => panic!("unexpected lock error: {e}"),
            }
        });
        assert!(!writer.join().expect("writer"));
    });

    drop(guard);
    assert_eq!(lock.status(), LockStatus::Free);
    assert!(set.is_empty(&*store.lock().expect("store")).expect("is_empty"));
}

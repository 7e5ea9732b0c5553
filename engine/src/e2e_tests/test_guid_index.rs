//! Unique GUID index on a file store, surviving close and reopen.

#![allow(clippy::expect_used, clippy::cast_possible_wrap)]

use std::ops::Bound;

use super::helpers::{guid, oids, store_person};
use crate::storage::{BTreeError, FieldIndex, FileStore, IndexError, IterationOrder, ObjectStore};
use crate::testing::{KeySequence, person_schema, temp_file_store};
use crate::types::{FieldKey, Key, NULL_OID, Oid};

const PEOPLE: usize = 300;

fn guid_key() -> FieldKey {
    FieldKey::new(&person_schema(), &["id"]).expect("field key")
}

#[test]
fn test_guid_lookup_after_reopen() {
    let (dir, mut store) = temp_file_store();
    let path = store.path().to_path_buf();

    let index = FieldIndex::create(&mut store, guid_key(), true, 16).expect("create index");
    store.set_root(index.oid());

    let mut people: Vec<(i64, Oid)> = Vec::with_capacity(PEOPLE);
    for key in KeySequence::default().take(PEOPLE) {
        let oid = store_person(&mut store, "someone", 30, guid(key), NULL_OID);
        index.put(&mut store, oid).expect("put");
        people.push((key, oid));
    }
    store.commit().expect("commit");
    drop(store);

    let store = FileStore::open(&path).expect("reopen");
    let index = FieldIndex::open(&store, store.root(), guid_key()).expect("open index");
    assert_eq!(index.count(&store).expect("count"), PEOPLE as u64);
    index.tree().check_invariants(&store).expect("invariants");

    for &(key, oid) in &people {
        assert_eq!(
            index.get(&store, &Key::from(guid(key))).expect("get"),
            Some(oid)
        );
    }
    assert_eq!(index.get(&store, &Key::from(guid(-1))).expect("get"), None);

    people.sort_unstable();
    let ordered = oids(
        index
            .range(&store, Bound::Unbounded, Bound::Unbounded, IterationOrder::Ascending)
            .expect("range"),
    );
    let expected: Vec<Oid> = people.iter().map(|&(_, oid)| oid).collect();
    assert_eq!(ordered, expected);

    drop(dir);
}

#[test]
fn test_guid_range_and_duplicate() {
    let (_dir, mut store) = temp_file_store();
    let index = FieldIndex::create(&mut store, guid_key(), true, 8).expect("create index");

    let people: Vec<Oid> = (0..100i64)
        .map(|n| {
            let oid = store_person(&mut store, "n", 1, guid(n), NULL_OID);
            index.put(&mut store, oid).expect("put");
            oid
        })
        .collect();

    let from = Key::from(guid(20));
    let to = Key::from(guid(30));
    let found = oids(
        index
            .range(
                &store,
                Bound::Excluded(&from),
                Bound::Included(&to),
                IterationOrder::Descending,
            )
            .expect("range"),
    );
    let expected: Vec<Oid> = people[21..=30].iter().rev().copied().collect();
    assert_eq!(found, expected);

    let twin = store_person(&mut store, "twin", 2, guid(42), NULL_OID);
    assert!(!index.insert(&mut store, twin).expect("insert twin"));
    assert!(matches!(
        index.put(&mut store, twin),
        Err(IndexError::Tree(BTreeError::DuplicateKey(_)))
    ));
    assert_eq!(index.get(&store, &Key::from(guid(42))).expect("get"), Some(people[42]));
    assert_eq!(index.count(&store).expect("count"), 100);
}

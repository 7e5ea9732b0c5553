//! Non-unique index with a tiny key domain, so every key has many entries.

#![allow(clippy::expect_used, clippy::cast_possible_truncation)]

use std::collections::BTreeMap;
use std::ops::Bound;

use super::helpers::oids;
use crate::storage::{BTree, IterationOrder, MemoryStore, ObjectStore};
use crate::testing::KeySequence;
use crate::types::{Key, KeyKind, KeyShape, Oid};

const ENTRIES: usize = 600;
const DISTINCT: i64 = 7;

fn populated() -> (MemoryStore, BTree, BTreeMap<i8, Vec<Oid>>) {
    let mut store = MemoryStore::new();
    let tree = BTree::create(&mut store, KeyShape::Scalar(KeyKind::I8), false, 6)
        .expect("create tree");
    let mut model: BTreeMap<i8, Vec<Oid>> = BTreeMap::new();
    for key in KeySequence::new(42).take(ENTRIES) {
        let key = (key % DISTINCT - DISTINCT / 2) as i8;
        let oid = store.allocate().expect("allocate");
        store.put(oid, vec![0]).expect("put");
        assert!(tree.insert(&mut store, Key::from(key), oid).expect("insert"));
        model.entry(key).or_default().push(oid);
    }
    (store, tree, model)
}

#[test]
fn test_counts_include_duplicates() {
    let (store, tree, model) = populated();
    tree.check_invariants(&store).expect("invariants");

    assert_eq!(tree.count(&store).expect("count"), ENTRIES as u64);
    assert_eq!(tree.size(&store).expect("size"), ENTRIES as u64);
    assert_eq!(
        tree.distinct_keys(&store).expect("distinct"),
        model.len() as u64
    );
}

#[test]
fn test_equal_range_returns_every_duplicate() {
    let (store, tree, model) = populated();

    for (&key, expected) in &model {
        let key = Key::from(key);
        let mut found = oids(
            tree.range(
                &store,
                Bound::Included(&key),
                Bound::Included(&key),
                IterationOrder::Ascending,
            )
            .expect("range"),
        );
        found.sort_unstable();
        assert_eq!(&found, expected);

        assert_eq!(&tree.get_all(&store, &key).expect("get_all"), expected);
        assert_eq!(tree.get(&store, &key).expect("get"), expected.first().copied());

        let mut backwards = oids(
            tree.range(
                &store,
                Bound::Included(&key),
                Bound::Included(&key),
                IterationOrder::Descending,
            )
            .expect("range"),
        );
        backwards.reverse();
        assert_eq!(&backwards, expected);
    }
}

#[test]
fn test_repeated_pair_is_not_added_twice() {
    let (mut store, tree, model) = populated();
    let (&key, holders) = model.iter().next().expect("some key");
    assert!(!tree.insert(&mut store, Key::from(key), holders[0]).expect("insert"));
    assert_eq!(tree.count(&store).expect("count"), ENTRIES as u64);
}

#[test]
fn test_remove_all_leaves_empty_iteration() {
    let (mut store, tree, model) = populated();

    for (i, (&key, holders)) in model.iter().enumerate() {
        for &oid in holders.iter().rev() {
            tree.remove(&mut store, &Key::from(key), oid).expect("remove");
        }
        assert!(tree.get(&store, &Key::from(key)).expect("get").is_none());
        if i % 2 == 0 {
            tree.check_invariants(&store).expect("invariants");
        }
    }

    assert_eq!(tree.count(&store).expect("count"), 0);
    assert_eq!(tree.distinct_keys(&store).expect("distinct"), 0);
    assert_eq!(
        tree.iter(&store, IterationOrder::Ascending).expect("iter").count(),
        0
    );
    assert_eq!(
        tree.iter(&store, IterationOrder::Descending).expect("iter").count(),
        0
    );
    tree.check_invariants(&store).expect("invariants");
}

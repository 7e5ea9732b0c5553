//! Index contents on a file store across commit, rollback and reopen.

#![allow(clippy::expect_used)]

use std::ops::Bound;

use crate::storage::{BTree, FileStore, IterationOrder, ObjectStore};
use crate::testing::{KeySequence, temp_file_store};
use crate::types::{Key, KeyKind, KeyShape, Oid, Scalar};

const KEYS: usize = 500;

fn object_for(store: &mut FileStore, key: i64) -> Oid {
    let oid = store.allocate().expect("allocate");
    store.put(oid, key.to_le_bytes().to_vec()).expect("put");
    oid
}

#[test]
fn test_committed_keys_survive_reopen() {
    let (_dir, mut store) = temp_file_store();
    let path = store.path().to_path_buf();
    let tree = BTree::create(&mut store, KeyShape::Scalar(KeyKind::I64), true, 12)
        .expect("create tree");
    store.set_root(tree.oid());

    let mut entries = Vec::with_capacity(KEYS);
    for key in KeySequence::default().take(KEYS) {
        let oid = object_for(&mut store, key);
        tree.put(&mut store, Key::from(key), oid).expect("put");
        entries.push((key, oid));
    }
    store.commit().expect("commit");
    drop(store);

    let store = FileStore::open(&path).expect("reopen");
    let tree = BTree::open(&store, store.root()).expect("open tree");
    tree.check_invariants(&store).expect("invariants");
    assert_eq!(tree.count(&store).expect("count"), KEYS as u64);

    for &(key, oid) in &entries {
        assert_eq!(tree.get(&store, &Key::from(key)).expect("get"), Some(oid));
        assert_eq!(store.get(oid).expect("object"), key.to_le_bytes().to_vec());
    }

    entries.sort_unstable();
    let descending: Vec<i64> = tree
        .iter(&store, IterationOrder::Descending)
        .expect("iter")
        .map(|entry| match entry.expect("entry").key {
            Key::Scalar(Scalar::I64(k)) => k,
            other => panic!("unexpected key {other}"),
        })
        .collect();
    let expected: Vec<i64> = entries.iter().rev().map(|&(key, _)| key).collect();
    assert_eq!(descending, expected);
}

#[test]
fn test_rollback_discards_uncommitted_entries() {
    let (_dir, mut store) = temp_file_store();
    let path = store.path().to_path_buf();
    let tree = BTree::create(&mut store, KeyShape::Scalar(KeyKind::I64), true, 8)
        .expect("create tree");
    store.set_root(tree.oid());

    let mut keys = KeySequence::new(7);
    let committed: Vec<i64> = keys.by_ref().take(100).collect();
    for &key in &committed {
        let oid = object_for(&mut store, key);
        tree.put(&mut store, Key::from(key), oid).expect("put");
    }
    store.commit().expect("commit");

    let uncommitted: Vec<i64> = keys.take(200).collect();
    for &key in &uncommitted {
        let oid = object_for(&mut store, key);
        tree.put(&mut store, Key::from(key), oid).expect("put");
    }
    for &key in committed.iter().take(30) {
        let oid = tree.get(&store, &Key::from(key)).expect("get").expect("present");
        tree.remove(&mut store, &Key::from(key), oid).expect("remove");
    }
    assert_eq!(tree.count(&store).expect("count"), 270);

    store.rollback().expect("rollback");
    tree.check_invariants(&store).expect("invariants after rollback");
    assert_eq!(tree.count(&store).expect("count"), 100);
    for key in &uncommitted {
        assert_eq!(tree.get(&store, &Key::from(*key)).expect("get"), None);
    }
    drop(store);

    let store = FileStore::open(&path).expect("reopen");
    let tree = BTree::open(&store, store.root()).expect("open tree");
    let low = Key::from(i64::MIN);
    let found = tree
        .range(&store, Bound::Included(&low), Bound::Unbounded, IterationOrder::Ascending)
        .expect("range")
        .count();
    assert_eq!(found, committed.len());
    for key in &committed {
        assert!(tree.get(&store, &Key::from(*key)).expect("get").is_some());
    }
}

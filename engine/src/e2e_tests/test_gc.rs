//! Garbage collection driven through indexes and record references.

#![allow(clippy::expect_used, clippy::cast_possible_wrap)]

use super::helpers::{guid, store_person};
use crate::storage::{
    FieldIndex, FileStore, GcFailureKind, MemoryStore, ObjectStore, collect_garbage,
    mark_reachable,
};
use crate::testing::{KeySequence, person_registry, person_schema, temp_file_store};
use crate::types::{FieldKey, NULL_OID, Oid};

fn age_key() -> FieldKey {
    FieldKey::new(&person_schema(), &["age"]).expect("field key")
}

fn age_index<S: ObjectStore>(store: &mut S) -> FieldIndex<FieldKey> {
    FieldIndex::create(store, age_key(), false, 4).expect("create index")
}

fn index_people<S: ObjectStore>(
    store: &mut S,
    index: &FieldIndex<FieldKey>,
    count: usize,
) -> Vec<Oid> {
    let mut people = Vec::with_capacity(count);
    for (i, key) in KeySequence::default().take(count).enumerate() {
        let age = i32::try_from(key % 100).expect("small age");
        let oid = store_person(store, "indexed", age, guid(i as i64), NULL_OID);
        index.put(store, oid).expect("put");
        people.push(oid);
    }
    people
}

#[test]
fn test_emptied_index_leaves_only_header_and_root() {
    let mut store = MemoryStore::new();
    let index = age_index(&mut store);
    store.set_root(index.oid());
    let people = index_people(&mut store, &index, 150);

    let registry = person_registry();
    let full = mark_reachable(&store, &[store.root()], &registry);
    assert!(full.failures.is_empty());
    let nodes: Vec<Oid> = (1..store.oid_limit())
        .filter(|&oid| full.is_reached(oid) && oid != index.oid() && !people.contains(&oid))
        .collect();
    assert!(nodes.len() > 10);

    for &oid in &people {
        index.remove(&mut store, oid).expect("remove");
    }
    index.tree().check_invariants(&store).expect("invariants");

    let report = mark_reachable(&store, &[store.root()], &registry);
    assert!(report.failures.is_empty());
    assert_eq!(report.reached_count(), 2);
    let root = index.tree().header(&store).expect("header").root;
    for &oid in &nodes {
        if oid != root {
            assert!(!report.is_reached(oid), "old node {oid} still reached");
        }
    }
    assert!(people.iter().all(|&oid| !report.is_reached(oid)));

    let collected = collect_garbage(&mut store, &registry).expect("collect");
    assert!(collected.unreachable.len() >= people.len());
    assert_eq!(collected.reclaimed, collected.unreachable.len());
    assert!(people.iter().all(|&oid| !store.is_allocated(oid)));
    assert!(store.is_allocated(root));
}

#[test]
fn test_dangling_spouse_blocks_reclamation() {
    let mut store = MemoryStore::new();
    let index = age_index(&mut store);
    store.set_root(index.oid());

    let gone = store_person(&mut store, "gone", 50, guid(1), NULL_OID);
    let widow = store_person(&mut store, "widow", 51, guid(2), gone);
    index.put(&mut store, widow).expect("put");
    let orphan = store_person(&mut store, "orphan", 52, guid(3), NULL_OID);
    store.free(gone).expect("free");

    let report = collect_garbage(&mut store, &person_registry()).expect("collect");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].oid, widow);
    assert!(matches!(
        report.failures[0].kind,
        GcFailureKind::DanglingReference(oid) if oid == gone
    ));
    assert_eq!(report.reclaimed, 0);
    assert!(report.unreachable.contains(&orphan));
    assert!(store.is_allocated(orphan));
}

#[test]
fn test_collection_persists_across_reopen() {
    let (_dir, mut store) = temp_file_store();
    let path = store.path().to_path_buf();
    let index = age_index(&mut store);
    store.set_root(index.oid());
    let people = index_people(&mut store, &index, 40);
    let (kept, dropped) = people.split_at(25);
    for &oid in dropped {
        index.remove(&mut store, oid).expect("remove");
    }
    store.commit().expect("commit");

    let report = collect_garbage(&mut store, &person_registry()).expect("collect");
    assert!(report.failures.is_empty());
    assert!(dropped.iter().all(|oid| report.unreachable.contains(oid)));
    store.commit().expect("commit collection");
    drop(store);

    let store = FileStore::open(&path).expect("reopen");
    assert!(dropped.iter().all(|&oid| !store.is_allocated(oid)));
    assert!(kept.iter().all(|&oid| store.is_allocated(oid)));
    let index = FieldIndex::open(&store, store.root(), age_key()).expect("open");
    assert_eq!(index.count(&store).expect("count"), kept.len() as u64);
    assert!(
        mark_reachable(&store, &[store.root()], &person_registry())
            .unreachable
            .is_empty()
    );
}

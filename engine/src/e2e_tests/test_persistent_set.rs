//! A persistent set of people as the store root, cleared and collected.

#![allow(clippy::expect_used, clippy::cast_possible_wrap)]

use super::helpers::{guid, name_for, store_person};
use crate::storage::{MemoryStore, ObjectStore, PersistentSet, collect_garbage, mark_reachable};
use crate::testing::{KeySequence, person_registry};
use crate::types::{NULL_OID, Oid};

fn people(store: &mut MemoryStore, count: usize) -> Vec<Oid> {
    KeySequence::default()
        .take(count)
        .enumerate()
        .map(|(i, key)| store_person(store, &name_for(key), 40, guid(i as i64), NULL_OID))
        .collect()
}

#[test]
fn test_set_members_are_reachable_through_the_set() {
    let mut store = MemoryStore::new();
    let set = PersistentSet::create(&mut store, 8).expect("create set");
    store.set_root(set.oid());

    let members = people(&mut store, 120);
    let (kept, dropped) = members.split_at(80);
    assert!(set.add_all(&mut store, kept.iter().copied()).expect("add_all"));
    assert_eq!(set.len(&store).expect("len"), 80);

    let report = mark_reachable(&store, &[store.root()], &person_registry());
    assert!(report.failures.is_empty());
    assert!(kept.iter().all(|&oid| report.is_reached(oid)));
    assert!(dropped.iter().all(|&oid| !report.is_reached(oid)));
    assert_eq!(report.unreachable, dropped.to_vec());
}

#[test]
fn test_clear_then_collect_reclaims_nodes_and_members() {
    let mut store = MemoryStore::new();
    let set = PersistentSet::create(&mut store, 4).expect("create set");
    store.set_root(set.oid());
    let members = people(&mut store, 100);
    set.add_all(&mut store, members.iter().copied()).expect("add_all");
    store.commit().expect("commit");

    let registry = person_registry();
    let before = mark_reachable(&store, &[store.root()], &registry);
    assert!(before.unreachable.is_empty());
    let old_nodes: Vec<Oid> = (1..store.oid_limit())
        .filter(|&oid| before.is_reached(oid) && oid != set.oid() && !members.contains(&oid))
        .collect();
    assert!(!old_nodes.is_empty());

    set.clear(&mut store).expect("clear");
    assert!(set.is_empty(&store).expect("is_empty"));

    let report = collect_garbage(&mut store, &registry).expect("collect");
    assert!(report.failures.is_empty());
    assert_eq!(report.reclaimed, report.unreachable.len());
    for &oid in old_nodes.iter().chain(&members) {
        assert!(!store.is_allocated(oid), "object {oid} not reclaimed");
    }
    assert!(store.is_allocated(set.oid()));
    store.commit().expect("commit");

    let newcomer = people(&mut store, 1)[0];
    assert!(set.add(&mut store, newcomer).expect("add after collect"));
    assert_eq!(set.len(&store).expect("len"), 1);
}

#[test]
fn test_two_sets_share_members() {
    let mut store = MemoryStore::new();
    let first = PersistentSet::create(&mut store, 4).expect("create first");
    let second = PersistentSet::create(&mut store, 4).expect("create second");
    let members = people(&mut store, 30);

    first.add_all(&mut store, members.iter().copied()).expect("fill first");
    second
        .add_all(&mut store, members.iter().rev().copied())
        .expect("fill second");
    assert!(first.content_eq(&store, &second).expect("eq"));
    assert_eq!(
        first.content_hash(&store).expect("hash"),
        second.content_hash(&store).expect("hash")
    );

    second.deallocate(&mut store).expect("deallocate");
    assert!(first.contains_all(&store, members.iter().copied()).expect("contains_all"));
    assert!(members.iter().all(|&oid| store.is_allocated(oid)));
}

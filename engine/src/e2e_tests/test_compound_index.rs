//! Compound (name, age) index over people.
//!
//! Ranges in either direction must agree with a sorted model of the keys,
//! and removing every record must leave the index empty and well formed.

#![allow(
    clippy::expect_used,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

use std::ops::Bound;

use super::helpers::{guid, key_parts, name_for, oids, store_person};
use crate::storage::{FieldIndex, IterationOrder, MemoryStore};
use crate::testing::{KeySequence, person_schema};
use crate::types::{FieldKey, Key, NULL_OID, Oid, Scalar};

const PEOPLE: usize = 400;

fn name_age_index(store: &mut MemoryStore) -> FieldIndex<FieldKey> {
    let extractor = FieldKey::new(&person_schema(), &["name", "age"]).expect("field key");
    FieldIndex::create(store, extractor, false, 8).expect("create index")
}

fn populate(store: &mut MemoryStore, index: &FieldIndex<FieldKey>) -> Vec<(String, i32, Oid)> {
    let mut model = Vec::with_capacity(PEOPLE);
    for (i, key) in KeySequence::default().take(PEOPLE).enumerate() {
        let name = name_for(key);
        let age = (key % 90) as i32;
        let oid = store_person(store, &name, age, guid(i as i64), NULL_OID);
        assert!(index.insert(store, oid).expect("insert"));
        model.push((name, age, oid));
    }
    model.sort();
    model
}

#[test]
fn test_compound_ranges_match_sorted_model() {
    let mut store = MemoryStore::new();
    let index = name_age_index(&mut store);
    let model = populate(&mut store, &index);
    index.tree().check_invariants(&store).expect("invariants");

    let expected: Vec<Vec<Scalar>> = model
        .iter()
        .map(|(name, age, _)| vec![Scalar::from(name.as_str()), Scalar::from(*age)])
        .collect();

    let ascending = key_parts(
        index
            .range(&store, Bound::Unbounded, Bound::Unbounded, IterationOrder::Ascending)
            .expect("ascending"),
    );
    assert_eq!(ascending, expected);

    let mut descending = key_parts(
        index
            .range(&store, Bound::Unbounded, Bound::Unbounded, IterationOrder::Descending)
            .expect("descending"),
    );
    descending.reverse();
    assert_eq!(descending, expected);
}

#[test]
fn test_bounded_compound_range() {
    let mut store = MemoryStore::new();
    let index = name_age_index(&mut store);
    let model = populate(&mut store, &index);

    let low = &model[PEOPLE / 4];
    let high = &model[3 * PEOPLE / 4];
    let from = Key::compound([Scalar::from(low.0.as_str()), Scalar::from(low.1)]);
    let to = Key::compound([Scalar::from(high.0.as_str()), Scalar::from(high.1)]);

    let mut expected: Vec<Oid> = model
        .iter()
        .filter(|(name, age, _)| {
            (name.as_str(), *age) >= (low.0.as_str(), low.1)
                && (name.as_str(), *age) < (high.0.as_str(), high.1)
        })
        .map(|&(_, _, oid)| oid)
        .collect();

    let mut found = oids(
        index
            .range(
                &store,
                Bound::Included(&from),
                Bound::Excluded(&to),
                IterationOrder::Ascending,
            )
            .expect("range"),
    );
    expected.sort_unstable();
    found.sort_unstable();
    assert_eq!(found, expected);

    let mut reversed = oids(
        index
            .range(
                &store,
                Bound::Included(&from),
                Bound::Excluded(&to),
                IterationOrder::Descending,
            )
            .expect("reverse range"),
    );
    reversed.sort_unstable();
    assert_eq!(reversed, expected);
}

#[test]
fn test_remove_every_person() {
    let mut store = MemoryStore::new();
    let index = name_age_index(&mut store);
    let model = populate(&mut store, &index);

    for (i, (_, _, oid)) in model.iter().enumerate() {
        index.remove(&mut store, *oid).expect("remove");
        assert!(!index.contains(&store, *oid).expect("contains"));
        if i % 50 == 0 {
            index.tree().check_invariants(&store).expect("invariants");
        }
    }

    assert_eq!(index.count(&store).expect("count"), 0);
    index.tree().check_invariants(&store).expect("invariants");
    assert_eq!(
        index
            .range(&store, Bound::Unbounded, Bound::Unbounded, IterationOrder::Ascending)
            .expect("range")
            .count(),
        0
    );
}

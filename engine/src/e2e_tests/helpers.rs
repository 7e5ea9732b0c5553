//! Common helpers for end-to-end tests.

#![allow(clippy::expect_used)]

use crate::storage::{ObjectStore, RangeIter};
use crate::testing::person_schema;
use crate::types::{FieldValue, Oid, Scalar};

/// Store a person record and return its OID.
pub fn store_person<S: ObjectStore>(
    store: &mut S,
    name: &str,
    age: i32,
    id: [u8; 16],
    spouse: Oid,
) -> Oid {
    let record = person_schema()
        .record(vec![
            FieldValue::scalar(name),
            FieldValue::scalar(age),
            FieldValue::scalar(id),
            FieldValue::Reference(spouse),
        ])
        .expect("valid person");
    let oid = store.allocate().expect("allocate person");
    store.put(oid, record.encode()).expect("store person");
    oid
}

/// A GUID whose big-endian bytes encode `n`, so GUID order follows `n`.
pub fn guid(n: i64) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[8..].copy_from_slice(&n.to_be_bytes());
    bytes
}

/// Name derived from a key so that string order differs from numeric order.
pub fn name_for(key: i64) -> String {
    format!("p{}", key % 1000)
}

/// Drain a range, returning the OIDs.
pub fn oids<S: ObjectStore>(iter: RangeIter<'_, S>) -> Vec<Oid> {
    iter.map(|entry| entry.expect("range entry").oid).collect()
}

/// Drain a range, returning the keys' scalar parts.
pub fn key_parts<S: ObjectStore>(iter: RangeIter<'_, S>) -> Vec<Vec<Scalar>> {
    iter.map(|entry| match entry.expect("range entry").key {
        crate::types::Key::Scalar(s) => vec![s],
        crate::types::Key::Compound(parts) => parts,
    })
    .collect()
}

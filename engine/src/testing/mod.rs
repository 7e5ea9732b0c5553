//! Shared helpers for unit and end-to-end tests.

#![allow(clippy::expect_used)]

use tempfile::TempDir;

use crate::storage::{FileStore, TypeRegistry};
use crate::types::{FieldDescriptor, KeyKind, RecordSchema};

/// Deterministic pseudo-random keys: `k' = (3141592621 * k + 2718281829) mod 1000000007`.
///
/// Every key is distinct within one period of the generator, which is far
/// longer than any test needs.
#[derive(Debug, Clone)]
pub struct KeySequence {
    current: i64,
}

impl KeySequence {
    pub const DEFAULT_SEED: i64 = 1999;

    #[must_use]
    pub const fn new(seed: i64) -> Self {
        Self { current: seed }
    }
}

impl Default for KeySequence {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

impl Iterator for KeySequence {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        self.current = (3_141_592_621 * self.current + 2_718_281_829) % 1_000_000_007;
        Some(self.current)
    }
}

/// A fresh file store in its own temporary directory.
///
/// Keep the `TempDir` alive for as long as the store is used.
pub fn temp_file_store() -> (TempDir, FileStore) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = FileStore::create(&dir.path().join("test.odb")).expect("create file store");
    (dir, store)
}

/// Record type used by scenario tests: a person with a spouse reference.
pub fn person_schema() -> RecordSchema {
    RecordSchema::new(
        0x20,
        "Person",
        vec![
            FieldDescriptor::scalar("name", KeyKind::String),
            FieldDescriptor::scalar("age", KeyKind::I32),
            FieldDescriptor::scalar("id", KeyKind::Guid),
            FieldDescriptor::reference("spouse"),
        ],
    )
    .expect("valid person schema")
}

/// Engine descriptors plus [`person_schema`].
pub fn person_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(Box::new(person_schema()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_sequence_is_deterministic() {
        let first: Vec<i64> = KeySequence::default().take(5).collect();
        let second: Vec<i64> = KeySequence::new(1999).take(5).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], (3_141_592_621 * 1999 + 2_718_281_829) % 1_000_000_007);
        assert!(first.iter().all(|&k| (0..1_000_000_007).contains(&k)));
    }
}

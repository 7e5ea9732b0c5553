//! Field index implementation.
//!
//! A field index maps a key derived from a record's fields to the record's
//! OID. The key is never stored separately: it is re-extracted from the
//! record's current bytes whenever the index needs it, so a record must be
//! removed from its indexes before its indexed fields change.

use std::ops::Bound;

use crate::storage::btree::{BTree, BTreeError, IterationOrder, RangeIter};
use crate::storage::indexes::IndexError;
use crate::storage::store::ObjectStore;
use crate::types::{Key, KeyExtractor, Oid};

/// B-tree index keyed by fields of stored records.
#[derive(Debug, Clone)]
pub struct FieldIndex<E> {
    tree: BTree,
    extractor: E,
}

impl<E: KeyExtractor> FieldIndex<E> {
    /// Create an empty index whose keys have the extractor's shape.
    pub fn create<S: ObjectStore>(
        store: &mut S,
        extractor: E,
        unique: bool,
        capacity: u16,
    ) -> Result<Self, IndexError> {
        let tree = BTree::create(store, extractor.shape(), unique, capacity)?;
        Ok(Self { tree, extractor })
    }

    /// Open an existing index. The stored key shape must match the
    /// extractor's.
    pub fn open<S: ObjectStore>(store: &S, oid: Oid, extractor: E) -> Result<Self, IndexError> {
        let tree = BTree::open(store, oid)?;
        let stored = tree.header(store)?.shape;
        let expected = extractor.shape();
        if stored != expected {
            return Err(BTreeError::TypeMismatch {
                expected,
                actual: stored,
            }
            .into());
        }
        Ok(Self { tree, extractor })
    }

    /// OID of the index header.
    #[must_use]
    pub const fn oid(&self) -> Oid {
        self.tree.oid()
    }

    /// The underlying tree.
    #[must_use]
    pub const fn tree(&self) -> BTree {
        self.tree
    }

    /// The key the record stored under `oid` is indexed by.
    pub fn key_of<S: ObjectStore>(&self, store: &S, oid: Oid) -> Result<Key, IndexError> {
        let bytes = store.get(oid)?;
        Ok(self.extractor.extract(&bytes)?)
    }

    /// Index the record stored under `oid`. Returns `false` if a unique
    /// index already holds its key, or the record is already indexed.
    pub fn insert<S: ObjectStore>(&self, store: &mut S, oid: Oid) -> Result<bool, IndexError> {
        let key = self.key_of(store, oid)?;
        Ok(self.tree.insert(store, key, oid)?)
    }

    /// Index the record stored under `oid`, failing on a duplicate.
    pub fn put<S: ObjectStore>(&self, store: &mut S, oid: Oid) -> Result<(), IndexError> {
        let key = self.key_of(store, oid)?;
        Ok(self.tree.put(store, key, oid)?)
    }

    /// Remove the record stored under `oid`, keyed by its current fields.
    pub fn remove<S: ObjectStore>(&self, store: &mut S, oid: Oid) -> Result<(), IndexError> {
        let key = self.key_of(store, oid)?;
        Ok(self.tree.remove(store, &key, oid)?)
    }

    /// Whether the record's current key locates an entry for `oid`.
    pub fn contains<S: ObjectStore>(&self, store: &S, oid: Oid) -> Result<bool, IndexError> {
        let key = self.key_of(store, oid)?;
        Ok(self.tree.contains(store, &key, oid)?)
    }

    pub fn get<S: ObjectStore>(&self, store: &S, key: &Key) -> Result<Option<Oid>, IndexError> {
        Ok(self.tree.get(store, key)?)
    }

    pub fn get_all<S: ObjectStore>(&self, store: &S, key: &Key) -> Result<Vec<Oid>, IndexError> {
        Ok(self.tree.get_all(store, key)?)
    }

    /// Lazily iterate the records whose keys lie between the bounds.
    pub fn range<'s, S: ObjectStore>(
        &self,
        store: &'s S,
        from: Bound<&Key>,
        to: Bound<&Key>,
        order: IterationOrder,
    ) -> Result<RangeIter<'s, S>, IndexError> {
        Ok(self.tree.range(store, from, to, order)?)
    }

    pub fn count<S: ObjectStore>(&self, store: &S) -> Result<u64, IndexError> {
        Ok(self.tree.count(store)?)
    }

    pub fn clear<S: ObjectStore>(&self, store: &mut S) -> Result<(), IndexError> {
        Ok(self.tree.clear(store)?)
    }
}

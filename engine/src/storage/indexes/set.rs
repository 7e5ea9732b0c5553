//! Persistent set of object identities.
//!
//! A unique B-tree keyed by each member's own OID (`KeyKind::U64`). Each
//! entry maps the member to itself.

use crate::storage::btree::{BTree, BTreeError, IterationOrder};
use crate::storage::indexes::IndexError;
use crate::storage::store::ObjectStore;
use crate::types::{Key, KeyKind, KeyShape, Oid};

/// Set of OIDs stored as a unique index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistentSet {
    tree: BTree,
}

const MEMBER_SHAPE: KeyShape = KeyShape::Scalar(KeyKind::U64);

fn member_key(member: Oid) -> Key {
    Key::from(member)
}

impl PersistentSet {
    /// Create an empty set.
    pub fn create<S: ObjectStore>(store: &mut S, capacity: u16) -> Result<Self, IndexError> {
        let tree = BTree::create(store, MEMBER_SHAPE, true, capacity)?;
        Ok(Self { tree })
    }

    /// Open an existing set; the index must be unique and keyed by OID.
    pub fn open<S: ObjectStore>(store: &S, oid: Oid) -> Result<Self, IndexError> {
        let tree = BTree::open(store, oid)?;
        let header = tree.header(store)?;
        if header.shape != MEMBER_SHAPE || !header.unique {
            return Err(BTreeError::TypeMismatch {
                expected: MEMBER_SHAPE,
                actual: header.shape,
            }
            .into());
        }
        Ok(Self { tree })
    }

    #[must_use]
    pub const fn oid(&self) -> Oid {
        self.tree.oid()
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn add<S: ObjectStore>(&self, store: &mut S, member: Oid) -> Result<bool, IndexError> {
        Ok(self.tree.insert(store, member_key(member), member)?)
    }

    /// Remove a member. Returns `false` if it was absent.
    pub fn remove<S: ObjectStore>(&self, store: &mut S, member: Oid) -> Result<bool, IndexError> {
        match self.tree.remove(store, &member_key(member), member) {
            Ok(()) => Ok(true),
            Err(BTreeError::KeyNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains<S: ObjectStore>(&self, store: &S, member: Oid) -> Result<bool, IndexError> {
        Ok(self.tree.get(store, &member_key(member))?.is_some())
    }

    /// Add every member; `true` if at least one was new.
    pub fn add_all<S: ObjectStore>(
        &self,
        store: &mut S,
        members: impl IntoIterator<Item = Oid>,
    ) -> Result<bool, IndexError> {
        let mut changed = false;
        for member in members {
            changed |= self.add(store, member)?;
        }
        Ok(changed)
    }

    /// Remove every member; `true` if at least one was present.
    pub fn remove_all<S: ObjectStore>(
        &self,
        store: &mut S,
        members: impl IntoIterator<Item = Oid>,
    ) -> Result<bool, IndexError> {
        let mut changed = false;
        for member in members {
            changed |= self.remove(store, member)?;
        }
        Ok(changed)
    }

    /// Whether every candidate is a member.
    pub fn contains_all<S: ObjectStore>(
        &self,
        store: &S,
        members: impl IntoIterator<Item = Oid>,
    ) -> Result<bool, IndexError> {
        for member in members {
            if !self.contains(store, member)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Empty the set. Old nodes are left to the garbage collector.
    pub fn clear<S: ObjectStore>(&self, store: &mut S) -> Result<(), IndexError> {
        Ok(self.tree.clear(store)?)
    }

    pub fn len<S: ObjectStore>(&self, store: &S) -> Result<u64, IndexError> {
        Ok(self.tree.count(store)?)
    }

    pub fn is_empty<S: ObjectStore>(&self, store: &S) -> Result<bool, IndexError> {
        Ok(self.len(store)? == 0)
    }

    /// Members in ascending OID order.
    pub fn iter<'s, S: ObjectStore>(
        &self,
        store: &'s S,
    ) -> Result<impl Iterator<Item = Result<Oid, IndexError>> + 's, IndexError> {
        let entries = self.tree.iter(store, IterationOrder::Ascending)?;
        Ok(entries.map(|entry| entry.map(|e| e.oid).map_err(IndexError::from)))
    }

    /// Same cardinality and every member of `self` is in `other`.
    pub fn content_eq<S: ObjectStore>(&self, store: &S, other: &Self) -> Result<bool, IndexError> {
        if self.len(store)? != other.len(store)? {
            return Ok(false);
        }
        for member in self.iter(store)? {
            if !other.contains(store, member?)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Wrapping sum of the member OIDs; independent of insertion order.
    pub fn content_hash<S: ObjectStore>(&self, store: &S) -> Result<u64, IndexError> {
        let mut hash = 0u64;
        for member in self.iter(store)? {
            hash = hash.wrapping_add(member?);
        }
        Ok(hash)
    }

    /// Free the set's nodes and header. Members are not touched.
    pub fn deallocate<S: ObjectStore>(self, store: &mut S) -> Result<(), IndexError> {
        Ok(self.tree.deallocate(store)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::MemoryStore;

    fn new_set(store: &mut MemoryStore) -> PersistentSet {
        PersistentSet::create(store, 4).expect("create set")
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut store = MemoryStore::new();
        let set = new_set(&mut store);

        assert!(set.add(&mut store, 10).expect("add"));
        assert!(!set.add(&mut store, 10).expect("add again"));
        assert_eq!(set.len(&store).expect("len"), 1);
        assert!(set.contains(&store, 10).expect("contains"));
        assert!(!set.contains(&store, 11).expect("contains"));
    }

    #[test]
    fn test_remove_never_fails_on_absent_member() {
        let mut store = MemoryStore::new();
        let set = new_set(&mut store);
        set.add(&mut store, 5).expect("add");

        assert!(!set.remove(&mut store, 6).expect("remove absent"));
        assert!(set.remove(&mut store, 5).expect("remove present"));
        assert!(!set.remove(&mut store, 5).expect("remove again"));
        assert!(set.is_empty(&store).expect("is_empty"));
    }

    #[test]
    fn test_bulk_operations_report_change() {
        let mut store = MemoryStore::new();
        let set = new_set(&mut store);

        assert!(set.add_all(&mut store, [1, 2, 3]).expect("add_all"));
        assert!(!set.add_all(&mut store, [1, 2]).expect("add_all again"));
        assert!(set.add_all(&mut store, [3, 4]).expect("add_all partial"));
        assert!(set.contains_all(&store, [1, 2, 3, 4]).expect("contains_all"));
        assert!(!set.contains_all(&store, [1, 9]).expect("contains_all"));
        assert!(set.contains_all(&store, std::iter::empty()).expect("empty contains_all"));

        assert!(set.remove_all(&mut store, [4, 8]).expect("remove_all"));
        assert!(!set.remove_all(&mut store, [8, 9]).expect("remove_all none"));
        assert_eq!(set.len(&store).expect("len"), 3);
    }

    #[test]
    fn test_iter_is_ascending() {
        let mut store = MemoryStore::new();
        let set = new_set(&mut store);
        for member in [40, 7, 1000, 3, 99, 12, 8, 500, 2] {
            set.add(&mut store, member).expect("add");
        }
        let members: Vec<Oid> = set
            .iter(&store)
            .expect("iter")
            .collect::<Result<_, _>>()
            .expect("members");
        assert_eq!(members, vec![2, 3, 7, 8, 12, 40, 99, 500, 1000]);
    }

    #[test]
    fn test_content_equality_and_hash_ignore_order() {
        let mut store = MemoryStore::new();
        let a = new_set(&mut store);
        let b = new_set(&mut store);
        a.add_all(&mut store, [5, 1, 9, 30]).expect("fill a");
        b.add_all(&mut store, [30, 9, 5, 1]).expect("fill b");

        assert!(a.content_eq(&store, &b).expect("eq"));
        assert_eq!(
            a.content_hash(&store).expect("hash"),
            b.content_hash(&store).expect("hash")
        );
        assert_eq!(a.content_hash(&store).expect("hash"), 45);

        b.remove(&mut store, 9).expect("remove");
        b.add(&mut store, 10).expect("add");
        assert!(!a.content_eq(&store, &b).expect("eq"));

        b.remove(&mut store, 10).expect("remove");
        assert!(!a.content_eq(&store, &b).expect("different sizes"));
    }

    #[test]
    fn test_clear_then_reuse() {
        let mut store = MemoryStore::new();
        let set = new_set(&mut store);
        set.add_all(&mut store, 1..=50).expect("add_all");

        set.clear(&mut store).expect("clear");
        assert!(set.is_empty(&store).expect("is_empty"));
        assert!(!set.contains(&store, 20).expect("contains"));
        assert!(set.add(&mut store, 20).expect("add after clear"));
    }

    #[test]
    fn test_open_rejects_non_set_index() {
        let mut store = MemoryStore::new();
        let tree = BTree::create(&mut store, KeyShape::Scalar(KeyKind::U64), false, 4)
            .expect("create tree");
        assert!(PersistentSet::open(&store, tree.oid()).is_err());

        let set = new_set(&mut store);
        assert_eq!(PersistentSet::open(&store, set.oid()).expect("open"), set);
    }
}

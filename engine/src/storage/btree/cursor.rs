//! Lazy range scans over the leaf chain.

use std::ops::Bound;

use crate::storage::btree::node::{IndexEntry, IndexHeader, LeafNode};
use crate::storage::btree::tree::{BTreeError, IterationOrder, find_leaf, read_leaf};
use crate::storage::store::ObjectStore;
use crate::types::{Key, NULL_OID};

/// Iterator over the entries of a key range, in either direction.
///
/// Holds one leaf at a time and follows sibling links as it goes. Empty
/// leaves are skipped. After yielding an error the iterator is exhausted.
pub struct RangeIter<'s, S: ObjectStore> {
    store: &'s S,
    order: IterationOrder,
    from: Bound<Key>,
    to: Bound<Key>,
    leaf: LeafNode,
    /// Ascending: index of the next entry. Descending: one past it.
    pos: usize,
    done: bool,
}

impl<'s, S: ObjectStore> RangeIter<'s, S> {
    pub(super) fn new(
        store: &'s S,
        header: &IndexHeader,
        from: Bound<&Key>,
        to: Bound<&Key>,
        order: IterationOrder,
    ) -> Result<Self, BTreeError> {
        let from = from.cloned();
        let to = to.cloned();
        let (leaf, pos) = match order {
            IterationOrder::Ascending => {
                let is_before = |e: &IndexEntry| below_start(&from, &e.key);
                let (_, leaf) = find_leaf(store, header, is_before)?;
                let pos = leaf.position(is_before);
                (leaf, pos)
            }
            IterationOrder::Descending => {
                let is_before = |e: &IndexEntry| !past_end(&to, &e.key);
                let (_, leaf) = find_leaf(store, header, is_before)?;
                let pos = leaf.position(is_before);
                (leaf, pos)
            }
        };
        Ok(Self {
            store,
            order,
            from,
            to,
            leaf,
            pos,
            done: false,
        })
    }

    fn step(&mut self) -> Result<Option<IndexEntry>, BTreeError> {
        loop {
            match self.order {
                IterationOrder::Ascending => {
                    if let Some(entry) = self.leaf.entries.get(self.pos) {
                        if past_end(&self.to, &entry.key) {
                            return Ok(None);
                        }
                        self.pos += 1;
                        return Ok(Some(entry.clone()));
                    }
                    if self.leaf.next == NULL_OID {
                        return Ok(None);
                    }
                    self.leaf = read_leaf(self.store, self.leaf.next)?;
                    self.pos = 0;
                }
                IterationOrder::Descending => {
                    if let Some(index) = self.pos.checked_sub(1) {
                        let entry = &self.leaf.entries[index];
                        if below_start(&self.from, &entry.key) {
                            return Ok(None);
                        }
                        self.pos = index;
                        return Ok(Some(entry.clone()));
                    }
                    if self.leaf.prev == NULL_OID {
                        return Ok(None);
                    }
                    self.leaf = read_leaf(self.store, self.leaf.prev)?;
                    self.pos = self.leaf.entries.len();
                }
            }
        }
    }
}

impl<S: ObjectStore> Iterator for RangeIter<'_, S> {
    type Item = Result<IndexEntry, BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// `key` sorts before the lower bound.
fn below_start(from: &Bound<Key>, key: &Key) -> bool {
    match from {
        Bound::Unbounded => false,
        Bound::Included(start) => key < start,
        Bound::Excluded(start) => key <= start,
    }
}

/// `key` sorts after the upper bound.
fn past_end(to: &Bound<Key>, key: &Key) -> bool {
    match to {
        Bound::Unbounded => false,
        Bound::Included(end) => key > end,
        Bound::Excluded(end) => key >= end,
    }
}

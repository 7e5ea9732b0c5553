//! B-tree index over an object store.
//!
//! A [`BTree`] is a copyable handle naming the OID of its index header. Every
//! operation takes the store explicitly and re-reads the header, so nothing is
//! cached between calls and two handles to the same index always agree.
//!
//! Entries are `(key, oid)` pairs ordered by key, then OID. Unique indexes
//! reject a second entry with an equal key; non-unique indexes keep every
//! distinct pair.
//!
//! # Atomicity
//!
//! Mutations stage every node they touch in a [`NodeBatch`]. Only once the
//! whole operation has succeeded are the nodes written (children before
//! parents, header last) and released nodes freed. If the operation fails,
//! OIDs it allocated are released and nothing else reaches the store.

#![allow(clippy::cast_possible_truncation)]

use std::ops::Bound;

use crate::storage::btree::cursor::RangeIter;
use crate::storage::btree::node::{IndexEntry, IndexHeader, InternalNode, LeafNode, Node};
use crate::storage::store::{ObjectStore, StoreError};
use crate::types::{Key, KeyShape, NULL_OID, Oid};

/// Node capacity used when the caller has no preference.
pub const DEFAULT_NODE_CAPACITY: u16 = 64;

/// Smallest node capacity that keeps split and merge well defined.
pub const MIN_NODE_CAPACITY: u16 = 4;

/// Direction of a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationOrder {
    #[default]
    Ascending,
    Descending,
}

/// Handle to a B-tree index stored in an [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BTree {
    header_oid: Oid,
}

impl BTree {
    /// Create an empty index and return its handle.
    pub fn create<S: ObjectStore>(
        store: &mut S,
        shape: KeyShape,
        unique: bool,
        capacity: u16,
    ) -> Result<Self, BTreeError> {
        if capacity < MIN_NODE_CAPACITY {
            return Err(BTreeError::InvalidCapacity(capacity));
        }
        if !shape.is_valid() {
            return Err(BTreeError::InvalidShape(shape));
        }

        let header_oid = store.allocate()?;
        let root = match store.allocate() {
            Ok(oid) => oid,
            Err(e) => {
                release(store, &[header_oid]);
                return Err(e.into());
            }
        };
        let header = IndexHeader {
            root,
            count: 0,
            height: 0,
            unique,
            capacity,
            shape,
        };
        let written = store
            .put(root, LeafNode::new().encode())
            .and_then(|()| store.put(header_oid, header.encode()));
        if let Err(e) = written {
            release(store, &[header_oid, root]);
            return Err(e.into());
        }
        Ok(Self { header_oid })
    }

    /// Open the index whose header is stored under `header_oid`.
    pub fn open<S: ObjectStore>(store: &S, header_oid: Oid) -> Result<Self, BTreeError> {
        let tree = Self { header_oid };
        tree.header(store)?;
        Ok(tree)
    }

    /// OID of the index header; store this to find the index again.
    #[must_use]
    pub const fn oid(&self) -> Oid {
        self.header_oid
    }

    /// Read the index header.
    pub fn header<S: ObjectStore>(&self, store: &S) -> Result<IndexHeader, BTreeError> {
        read_header(store, self.header_oid)
    }

    /// Number of stored entries, duplicates included.
    pub fn count<S: ObjectStore>(&self, store: &S) -> Result<u64, BTreeError> {
        Ok(self.header(store)?.count)
    }

    /// Same as [`BTree::count`].
    pub fn size<S: ObjectStore>(&self, store: &S) -> Result<u64, BTreeError> {
        self.count(store)
    }

    /// Number of distinct keys, by a full scan.
    pub fn distinct_keys<S: ObjectStore>(&self, store: &S) -> Result<u64, BTreeError> {
        let mut distinct = 0;
        let mut last: Option<Key> = None;
        for entry in self.iter(store, IterationOrder::Ascending)? {
            let entry = entry?;
            if last.as_ref() != Some(&entry.key) {
                distinct += 1;
                last = Some(entry.key);
            }
        }
        Ok(distinct)
    }

    /// Add an entry. Returns `false` without changing anything when a unique
    /// index already holds the key or the exact pair is already present.
    pub fn insert<S: ObjectStore>(
        &self,
        store: &mut S,
        key: Key,
        oid: Oid,
    ) -> Result<bool, BTreeError> {
        if oid == NULL_OID {
            return Err(BTreeError::NullOid);
        }
        let header = self.header(store)?;
        check_key(&header, &key)?;
        if header.unique {
            let mut existing = RangeIter::new(
                &*store,
                &header,
                Bound::Included(&key),
                Bound::Included(&key),
                IterationOrder::Ascending,
            )?;
            if existing.next().transpose()?.is_some() {
                return Ok(false);
            }
        }
        let header_oid = self.header_oid;
        NodeBatch::run(store, header_oid, header, |batch| {
            batch.insert(IndexEntry::new(key, oid))
        })
    }

    /// Add an entry, failing with [`BTreeError::DuplicateKey`] where
    /// [`BTree::insert`] would return `false`.
    pub fn put<S: ObjectStore>(&self, store: &mut S, key: Key, oid: Oid) -> Result<(), BTreeError> {
        if self.insert(store, key.clone(), oid)? {
            Ok(())
        } else {
            Err(BTreeError::DuplicateKey(key))
        }
    }

    /// Remove the exact `(key, oid)` entry.
    pub fn remove<S: ObjectStore>(
        &self,
        store: &mut S,
        key: &Key,
        oid: Oid,
    ) -> Result<(), BTreeError> {
        let header = self.header(store)?;
        check_key(&header, key)?;
        let entry = IndexEntry::new(key.clone(), oid);
        NodeBatch::run(store, self.header_oid, header, |batch| batch.remove(&entry))
    }

    /// OID of the first entry with this key.
    pub fn get<S: ObjectStore>(&self, store: &S, key: &Key) -> Result<Option<Oid>, BTreeError> {
        let mut iter = self.range(
            store,
            Bound::Included(key),
            Bound::Included(key),
            IterationOrder::Ascending,
        )?;
        Ok(iter.next().transpose()?.map(|entry| entry.oid))
    }

    /// OIDs of every entry with this key, ascending.
    pub fn get_all<S: ObjectStore>(&self, store: &S, key: &Key) -> Result<Vec<Oid>, BTreeError> {
        self.range(
            store,
            Bound::Included(key),
            Bound::Included(key),
            IterationOrder::Ascending,
        )?
        .map(|entry| entry.map(|e| e.oid))
        .collect()
    }

    /// Whether the exact `(key, oid)` entry is present.
    pub fn contains<S: ObjectStore>(
        &self,
        store: &S,
        key: &Key,
        oid: Oid,
    ) -> Result<bool, BTreeError> {
        let header = self.header(store)?;
        check_key(&header, key)?;
        let entry = IndexEntry::new(key.clone(), oid);
        let (_, leaf) = find_leaf(store, &header, |s| s <= &entry)?;
        Ok(leaf.find(&entry).is_ok())
    }

    /// Lazily iterate the entries between two key bounds.
    pub fn range<'s, S: ObjectStore>(
        &self,
        store: &'s S,
        from: Bound<&Key>,
        to: Bound<&Key>,
        order: IterationOrder,
    ) -> Result<RangeIter<'s, S>, BTreeError> {
        let header = self.header(store)?;
        for bound in [from, to] {
            if let Bound::Included(key) | Bound::Excluded(key) = bound {
                check_key(&header, key)?;
            }
        }
        RangeIter::new(store, &header, from, to, order)
    }

    /// Iterate every entry.
    pub fn iter<'s, S: ObjectStore>(
        &self,
        store: &'s S,
        order: IterationOrder,
    ) -> Result<RangeIter<'s, S>, BTreeError> {
        self.range(store, Bound::Unbounded, Bound::Unbounded, order)
    }

    /// Drop every entry by installing a fresh empty root.
    ///
    /// The old nodes are not freed; they become unreachable and are left to
    /// the garbage collector.
    pub fn clear<S: ObjectStore>(&self, store: &mut S) -> Result<(), BTreeError> {
        let header = self.header(store)?;
        NodeBatch::run(store, self.header_oid, header, |batch| {
            let root = batch.allocate()?;
            batch.stage(root, 0, Node::Leaf(LeafNode::new()));
            batch.header.root = root;
            batch.header.height = 0;
            batch.header.count = 0;
            batch.header_dirty = true;
            Ok(())
        })
    }

    /// Free every node and the header. The handle is invalid afterwards.
    ///
    /// Indexed objects are not touched.
    pub fn deallocate<S: ObjectStore>(self, store: &mut S) -> Result<(), BTreeError> {
        let header = self.header(store)?;
        let mut nodes = Vec::new();
        let mut level = vec![header.root];
        for _ in 0..=header.height {
            let mut below = Vec::new();
            for &oid in &level {
                if let Node::Internal(internal) = read_node(store, oid)? {
                    below.extend(internal.children);
                }
            }
            nodes.append(&mut level);
            level = below;
        }
        for oid in nodes {
            store.free(oid)?;
        }
        store.free(self.header_oid)?;
        Ok(())
    }

    /// Verify the structural invariants of the whole tree.
    ///
    /// Checks entry order, separator bounds, node occupancy, uniform leaf
    /// depth, the leaf sibling chain, key shapes, key uniqueness and the
    /// stored count. Any violation is reported as [`BTreeError::Corrupt`].
    pub fn check_invariants<S: ObjectStore>(&self, store: &S) -> Result<(), BTreeError> {
        let header = self.header(store)?;
        let mut checker = InvariantChecker {
            store,
            header: &header,
            min: min_occupancy(header.capacity),
            leaves: Vec::new(),
            count: 0,
        };
        checker.check_node(header.root, 0, None, None)?;

        if checker.count != header.count {
            return Err(corrupt(format!(
                "header count {} but {} entries stored",
                header.count, checker.count
            )));
        }

        let leaves = std::mem::take(&mut checker.leaves);
        let mut prev = NULL_OID;
        let mut last_key: Option<Key> = None;
        for (i, &oid) in leaves.iter().enumerate() {
            let leaf = read_leaf(store, oid)?;
            if leaf.prev != prev {
                return Err(corrupt(format!(
                    "leaf {oid} prev link {} expected {prev}",
                    leaf.prev
                )));
            }
            let expected_next = leaves.get(i + 1).copied().unwrap_or(NULL_OID);
            if leaf.next != expected_next {
                return Err(corrupt(format!(
                    "leaf {oid} next link {} expected {expected_next}",
                    leaf.next
                )));
            }
            if header.unique {
                for entry in &leaf.entries {
                    if last_key.as_ref() == Some(&entry.key) {
                        return Err(corrupt(format!("duplicate key {} in unique index", entry.key)));
                    }
                    last_key = Some(entry.key.clone());
                }
            }
            prev = oid;
        }
        Ok(())
    }
}

/// Minimum occupancy of a non-root node: `ceil(M / 2)`.
const fn min_occupancy(capacity: u16) -> usize {
    (capacity as usize).div_ceil(2)
}

fn corrupt(message: String) -> BTreeError {
    BTreeError::Corrupt(message)
}

fn check_key(header: &IndexHeader, key: &Key) -> Result<(), BTreeError> {
    if header.shape.accepts(key) {
        Ok(())
    } else {
        Err(BTreeError::TypeMismatch {
            expected: header.shape.clone(),
            actual: key.shape(),
        })
    }
}

/// Best-effort release of OIDs after a failed operation.
fn release<S: ObjectStore>(store: &mut S, oids: &[Oid]) {
    for &oid in oids {
        if let Err(e) = store.free(oid) {
            tracing::warn!("failed to release index object {}: {}", oid, e);
        }
    }
}

pub(super) fn read_header<S: ObjectStore>(
    store: &S,
    header_oid: Oid,
) -> Result<IndexHeader, BTreeError> {
    let bytes = store.get(header_oid)?;
    IndexHeader::decode(&bytes).map_err(|e| corrupt(format!("index header {header_oid}: {e}")))
}

pub(super) fn read_node<S: ObjectStore>(store: &S, oid: Oid) -> Result<Node, BTreeError> {
    let bytes = store.get(oid)?;
    Node::decode(&bytes).map_err(|e| corrupt(format!("node {oid}: {e}")))
}

pub(super) fn read_leaf<S: ObjectStore>(store: &S, oid: Oid) -> Result<LeafNode, BTreeError> {
    match read_node(store, oid)? {
        Node::Leaf(leaf) => Ok(leaf),
        Node::Internal(_) => Err(corrupt(format!("node {oid} is not a leaf"))),
    }
}

fn child_at(node: &InternalNode, index: usize) -> Result<Oid, BTreeError> {
    node.children
        .get(index)
        .copied()
        .ok_or_else(|| corrupt(format!("child index {index} out of range")))
}

/// Descend from the root to the leaf that holds the first entry for which
/// `is_before` is false (or the leaf just before it).
pub(super) fn find_leaf<S: ObjectStore>(
    store: &S,
    header: &IndexHeader,
    mut is_before: impl FnMut(&IndexEntry) -> bool,
) -> Result<(Oid, LeafNode), BTreeError> {
    let mut oid = header.root;
    for _ in 0..=header.height {
        match read_node(store, oid)? {
            Node::Leaf(leaf) => return Ok((oid, leaf)),
            Node::Internal(internal) => {
                oid = child_at(&internal, internal.child_index(&mut is_before))?;
            }
        }
    }
    Err(corrupt(format!(
        "no leaf within {} levels of the root",
        header.height
    )))
}

/// Staged node writes for one mutating operation.
struct NodeBatch<'s, S: ObjectStore> {
    store: &'s mut S,
    header_oid: Oid,
    header: IndexHeader,
    header_dirty: bool,
    /// `(oid, level, node)`; leaves are level 0.
    staged: Vec<(Oid, u32, Node)>,
    allocated: Vec<Oid>,
    freed: Vec<Oid>,
}

impl<'s, S: ObjectStore> NodeBatch<'s, S> {
    /// Run `op` against a fresh batch, then flush it or abandon it.
    fn run<T>(
        store: &'s mut S,
        header_oid: Oid,
        header: IndexHeader,
        op: impl FnOnce(&mut Self) -> Result<T, BTreeError>,
    ) -> Result<T, BTreeError> {
        let mut batch = Self {
            store,
            header_oid,
            header,
            header_dirty: false,
            staged: Vec::new(),
            allocated: Vec::new(),
            freed: Vec::new(),
        };
        match op(&mut batch) {
            Ok(value) => {
                batch.flush()?;
                Ok(value)
            }
            Err(e) => {
                batch.abandon();
                Err(e)
            }
        }
    }

    fn load(&self, oid: Oid) -> Result<Node, BTreeError> {
        if let Some((_, _, node)) = self.staged.iter().find(|(o, _, _)| *o == oid) {
            return Ok(node.clone());
        }
        read_node(&*self.store, oid)
    }

    fn load_leaf(&self, oid: Oid) -> Result<LeafNode, BTreeError> {
        match self.load(oid)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(corrupt(format!("node {oid} is not a leaf"))),
        }
    }

    fn stage(&mut self, oid: Oid, level: u32, node: Node) {
        match self.staged.iter_mut().find(|(o, _, _)| *o == oid) {
            Some(slot) => slot.2 = node,
            None => self.staged.push((oid, level, node)),
        }
    }

    fn allocate(&mut self) -> Result<Oid, BTreeError> {
        let oid = self.store.allocate()?;
        self.allocated.push(oid);
        Ok(oid)
    }

    fn free(&mut self, oid: Oid) {
        self.staged.retain(|(o, _, _)| *o != oid);
        self.freed.push(oid);
    }

    /// Point `next`'s prev link at `prev`, if there is a `next` leaf.
    fn relink_prev(&mut self, next: Oid, prev: Oid) -> Result<(), BTreeError> {
        if next == NULL_OID {
            return Ok(());
        }
        let mut leaf = self.load_leaf(next)?;
        leaf.prev = prev;
        self.stage(next, 0, Node::Leaf(leaf));
        Ok(())
    }

    fn flush(mut self) -> Result<(), BTreeError> {
        self.staged.sort_by_key(|(_, level, _)| *level);
        for (oid, _, node) in &self.staged {
            self.store.put(*oid, node.encode())?;
        }
        if self.header_dirty {
            self.store.put(self.header_oid, self.header.encode())?;
        }
        for &oid in &self.freed {
            self.store.free(oid)?;
        }
        Ok(())
    }

    fn abandon(self) {
        release(self.store, &self.allocated);
    }

    /// Descend to the leaf that holds (or would hold) `entry`, recording
    /// the internal nodes passed and the child index taken in each.
    fn descend(
        &self,
        entry: &IndexEntry,
    ) -> Result<(Vec<(Oid, InternalNode, usize)>, Oid, LeafNode), BTreeError> {
        let mut path = Vec::with_capacity(self.header.height as usize);
        let mut oid = self.header.root;
        loop {
            match self.load(oid)? {
                Node::Leaf(leaf) => return Ok((path, oid, leaf)),
                Node::Internal(internal) => {
                    if path.len() >= self.header.height as usize {
                        return Err(corrupt(format!(
                            "internal node {oid} below declared height {}",
                            self.header.height
                        )));
                    }
                    let index = internal.child_index(|s| s <= entry);
                    let child = child_at(&internal, index)?;
                    path.push((oid, internal, index));
                    oid = child;
                }
            }
        }
    }

    fn insert(&mut self, entry: IndexEntry) -> Result<bool, BTreeError> {
        let capacity = self.header.capacity as usize;
        let (mut path, leaf_oid, mut leaf) = self.descend(&entry)?;
        let position = match leaf.find(&entry) {
            Ok(_) => return Ok(false),
            Err(position) => position,
        };
        leaf.entries.insert(position, entry);
        self.header.count += 1;
        self.header_dirty = true;

        if leaf.entries.len() <= capacity {
            self.stage(leaf_oid, 0, Node::Leaf(leaf));
            return Ok(true);
        }

        let mut right = leaf.split();
        let right_oid = self.allocate()?;
        right.prev = leaf_oid;
        leaf.next = right_oid;
        self.relink_prev(right.next, right_oid)?;
        let separator = right
            .entries
            .first()
            .cloned()
            .ok_or_else(|| corrupt("split produced an empty leaf".to_owned()))?;
        self.stage(leaf_oid, 0, Node::Leaf(leaf));
        self.stage(right_oid, 0, Node::Leaf(right));

        let mut pending = Some((separator, right_oid));
        let mut level = 0;
        while let Some((separator, right_child)) = pending.take() {
            level += 1;
            if let Some((node_oid, mut node, index)) = path.pop() {
                node.insert(index, separator, right_child);
                if node.children.len() <= capacity {
                    self.stage(node_oid, level, Node::Internal(node));
                } else {
                    let (median, right_node) = node
                        .split()
                        .ok_or_else(|| corrupt(format!("cannot split node {node_oid}")))?;
                    let right_node_oid = self.allocate()?;
                    self.stage(node_oid, level, Node::Internal(node));
                    self.stage(right_node_oid, level, Node::Internal(right_node));
                    pending = Some((median, right_node_oid));
                }
            } else {
                let new_root = self.allocate()?;
                let old_root = self.header.root;
                self.stage(
                    new_root,
                    level,
                    Node::Internal(InternalNode::with_children(old_root, separator, right_child)),
                );
                self.header.root = new_root;
                self.header.height += 1;
                tracing::debug!(
                    "index {} root split: height now {}",
                    self.header_oid,
                    self.header.height
                );
            }
        }
        Ok(true)
    }

    fn remove(&mut self, entry: &IndexEntry) -> Result<(), BTreeError> {
        let (mut path, leaf_oid, mut leaf) = self.descend(entry)?;
        let position = leaf
            .find(entry)
            .map_err(|_| BTreeError::KeyNotFound(entry.key.clone()))?;
        leaf.entries.remove(position);
        self.header.count = self.header.count.saturating_sub(1);
        self.header_dirty = true;

        let min = min_occupancy(self.header.capacity);
        let mut node_oid = leaf_oid;
        let mut node = Node::Leaf(leaf);
        let mut level = 0;
        loop {
            let Some((parent_oid, mut parent, index)) = path.pop() else {
                self.settle_root(node_oid, node);
                return Ok(());
            };
            if node.len() >= min {
                self.stage(node_oid, level, node);
                return Ok(());
            }
            self.rebalance(&mut parent, index, node_oid, node, level)?;
            node_oid = parent_oid;
            node = Node::Internal(parent);
            level += 1;
        }
    }

    /// Stage the root, collapsing an internal root with a single child.
    fn settle_root(&mut self, root_oid: Oid, root: Node) {
        match root {
            Node::Internal(internal) if internal.children.len() == 1 => {
                self.free(root_oid);
                self.header.root = internal.children[0];
                self.header.height = self.header.height.saturating_sub(1);
                tracing::debug!(
                    "index {} root collapse: height now {}",
                    self.header_oid,
                    self.header.height
                );
            }
            root => self.stage(root_oid, self.header.height, root),
        }
    }

    /// Restore occupancy of an underfull child of `parent` by borrowing from
    /// a sibling or merging with one.
    fn rebalance(
        &mut self,
        parent: &mut InternalNode,
        index: usize,
        node_oid: Oid,
        mut node: Node,
        level: u32,
    ) -> Result<(), BTreeError> {
        let min = min_occupancy(self.header.capacity);
        let left = match index.checked_sub(1) {
            Some(i) => {
                let oid = child_at(parent, i)?;
                Some((oid, self.load(oid)?))
            }
            None => None,
        };

        match left {
            Some((left_oid, mut left_node)) if left_node.len() > min => {
                rotate_right(&mut parent.separators[index - 1], &mut left_node, &mut node)?;
                self.stage(left_oid, level, left_node);
                self.stage(node_oid, level, node);
            }
            left => {
                let right = if index + 1 < parent.children.len() {
                    let oid = child_at(parent, index + 1)?;
                    Some((oid, self.load(oid)?))
                } else {
                    None
                };
                match (left, right) {
                    (_, Some((right_oid, mut right_node))) if right_node.len() > min => {
                        rotate_left(&mut parent.separators[index], &mut node, &mut right_node)?;
                        self.stage(node_oid, level, node);
                        self.stage(right_oid, level, right_node);
                    }
                    (Some((left_oid, mut left_node)), _) => {
                        let separator = parent.separators.remove(index - 1);
                        parent.children.remove(index);
                        let next = merge(separator, &mut left_node, node)?;
                        self.relink_prev(next, left_oid)?;
                        self.stage(left_oid, level, left_node);
                        self.free(node_oid);
                    }
                    (None, Some((right_oid, right_node))) => {
                        let separator = parent.separators.remove(index);
                        parent.children.remove(index + 1);
                        let next = merge(separator, &mut node, right_node)?;
                        self.relink_prev(next, node_oid)?;
                        self.stage(node_oid, level, node);
                        self.free(right_oid);
                    }
                    (None, None) => {
                        return Err(corrupt(format!("underfull node {node_oid} has no siblings")));
                    }
                }
            }
        }
        Ok(())
    }
}

fn mismatched_siblings() -> BTreeError {
    corrupt("sibling nodes of different kinds".to_owned())
}

fn empty_sibling() -> BTreeError {
    corrupt("cannot borrow from an empty sibling".to_owned())
}

/// Move the last item of `left` to the front of `right`; `separator` sits
/// between them in the parent.
fn rotate_right(
    separator: &mut IndexEntry,
    left: &mut Node,
    right: &mut Node,
) -> Result<(), BTreeError> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            let moved = left.entries.pop().ok_or_else(empty_sibling)?;
            *separator = moved.clone();
            right.entries.insert(0, moved);
        }
        (Node::Internal(left), Node::Internal(right)) => {
            let child = left.children.pop().ok_or_else(empty_sibling)?;
            let up = left.separators.pop().ok_or_else(empty_sibling)?;
            let down = std::mem::replace(separator, up);
            right.children.insert(0, child);
            right.separators.insert(0, down);
        }
        _ => return Err(mismatched_siblings()),
    }
    Ok(())
}

/// Move the first item of `right` to the end of `left`.
fn rotate_left(
    separator: &mut IndexEntry,
    left: &mut Node,
    right: &mut Node,
) -> Result<(), BTreeError> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            if right.entries.len() < 2 {
                return Err(empty_sibling());
            }
            left.entries.push(right.entries.remove(0));
            *separator = right.entries[0].clone();
        }
        (Node::Internal(left), Node::Internal(right)) => {
            if right.separators.is_empty() {
                return Err(empty_sibling());
            }
            let child = right.children.remove(0);
            let up = right.separators.remove(0);
            let down = std::mem::replace(separator, up);
            left.separators.push(down);
            left.children.push(child);
        }
        _ => return Err(mismatched_siblings()),
    }
    Ok(())
}

/// Append `right` to `left`. Returns the leaf after the merged pair
/// (`NULL_OID` for internal nodes), whose prev link the caller must fix.
fn merge(separator: IndexEntry, left: &mut Node, right: Node) -> Result<Oid, BTreeError> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            left.entries.extend(right.entries);
            left.next = right.next;
            Ok(right.next)
        }
        (Node::Internal(left), Node::Internal(right)) => {
            left.separators.push(separator);
            left.separators.extend(right.separators);
            left.children.extend(right.children);
            Ok(NULL_OID)
        }
        _ => Err(mismatched_siblings()),
    }
}

struct InvariantChecker<'a, S: ObjectStore> {
    store: &'a S,
    header: &'a IndexHeader,
    min: usize,
    /// Leaves in key order, as found by the walk.
    leaves: Vec<Oid>,
    count: u64,
}

impl<S: ObjectStore> InvariantChecker<'_, S> {
    fn check_node(
        &mut self,
        oid: Oid,
        depth: u32,
        lower: Option<&IndexEntry>,
        upper: Option<&IndexEntry>,
    ) -> Result<(), BTreeError> {
        let is_root = depth == 0;
        let capacity = self.header.capacity as usize;
        let node = read_node(self.store, oid)?;
        let occupancy = node.len();
        if occupancy > capacity {
            return Err(corrupt(format!(
                "node {oid} holds {occupancy}, capacity {capacity}"
            )));
        }

        match node {
            Node::Leaf(leaf) => {
                if depth != self.header.height {
                    return Err(corrupt(format!(
                        "leaf {oid} at depth {depth}, height {}",
                        self.header.height
                    )));
                }
                if !is_root && occupancy < self.min {
                    return Err(corrupt(format!(
                        "leaf {oid} holds {occupancy} entries, minimum {}",
                        self.min
                    )));
                }
                self.check_sorted(oid, &leaf.entries, lower, upper)?;
                if let Some(bad) = leaf.entries.iter().find(|e| !self.header.shape.accepts(&e.key)) {
                    return Err(corrupt(format!(
                        "leaf {oid} key {} does not match shape {}",
                        bad.key, self.header.shape
                    )));
                }
                self.count += leaf.entries.len() as u64;
                self.leaves.push(oid);
            }
            Node::Internal(internal) => {
                if depth >= self.header.height {
                    return Err(corrupt(format!(
                        "internal node {oid} at depth {depth}, height {}",
                        self.header.height
                    )));
                }
                let floor = if is_root { 2 } else { self.min };
                if occupancy < floor {
                    return Err(corrupt(format!(
                        "internal node {oid} has {occupancy} children, minimum {floor}"
                    )));
                }
                if internal.separators.len() + 1 != internal.children.len() {
                    return Err(corrupt(format!(
                        "internal node {oid} has {} separators for {} children",
                        internal.separators.len(),
                        internal.children.len()
                    )));
                }
                self.check_sorted(oid, &internal.separators, lower, upper)?;
                for (i, &child) in internal.children.iter().enumerate() {
                    let child_lower = if i == 0 {
                        lower
                    } else {
                        internal.separators.get(i - 1)
                    };
                    let child_upper = internal.separators.get(i).or(upper);
                    self.check_node(child, depth + 1, child_lower, child_upper)?;
                }
            }
        }
        Ok(())
    }

    /// Entries must ascend strictly and lie in `[lower, upper)`.
    fn check_sorted(
        &self,
        oid: Oid,
        entries: &[IndexEntry],
        lower: Option<&IndexEntry>,
        upper: Option<&IndexEntry>,
    ) -> Result<(), BTreeError> {
        if entries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(corrupt(format!("node {oid} entries out of order")));
        }
        if let (Some(lower), Some(first)) = (lower, entries.first()) {
            if first < lower {
                return Err(corrupt(format!("node {oid} has an entry below its separator")));
            }
        }
        if let (Some(upper), Some(last)) = (upper, entries.last()) {
            if last >= upper {
                return Err(corrupt(format!("node {oid} has an entry at or above its separator")));
            }
        }
        Ok(())
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// A unique index already holds the key.
    DuplicateKey(Key),
    /// No entry matches the key and OID.
    KeyNotFound(Key),
    /// The key does not have the index's declared shape.
    TypeMismatch { expected: KeyShape, actual: KeyShape },
    /// `NULL_OID` cannot be indexed.
    NullOid,
    /// Node capacity below the minimum.
    InvalidCapacity(u16),
    /// The key shape cannot be stored.
    InvalidShape(KeyShape),
    /// The stored tree violates a structural invariant.
    Corrupt(String),
    /// Store error.
    Store(StoreError),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey(key) => write!(f, "duplicate key: {key}"),
            Self::KeyNotFound(key) => write!(f, "key not found: {key}"),
            Self::TypeMismatch { expected, actual } => {
                write!(f, "key type mismatch: expected {expected}, got {actual}")
            }
            Self::NullOid => write!(f, "cannot index the null OID"),
            Self::InvalidCapacity(capacity) => write!(
                f,
                "node capacity {capacity} is below the minimum of {MIN_NODE_CAPACITY}"
            ),
            Self::InvalidShape(shape) => write!(f, "invalid key shape: {shape}"),
            Self::Corrupt(msg) => write!(f, "corrupt index: {msg}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BTreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

//! B-tree node types and serialization.
//!
//! Every node is one stored object:
//! - Leaf nodes hold sorted `(key, oid)` entries and are doubly linked to
//!   their siblings for range scans.
//! - Internal nodes hold N separators and N+1 child OIDs.
//! - The index header names the root and carries the tree's metadata.
//!
//! # Layouts
//!
//! - Header: `tag | root (8) | count (8) | height (4) | unique (1) | capacity (2) | shape`
//! - Leaf: `tag | prev (8) | next (8) | n (4) | (key | oid (8))*n`
//! - Internal: `tag | n (4) | child (8) | (key | oid (8) | child (8))*n`

#![allow(clippy::cast_possible_truncation)]

use crate::storage::codec::{ByteReader, ByteWriter, CodecError};
use crate::storage::descriptor::{
    TAG_INDEX_HEADER, TAG_INTERNAL, TAG_LEAF, TraceError, TypeDescriptor,
};
use crate::types::{Key, KeyShape, NULL_OID, Oid};

/// One indexed object: ordered by key, then by OID.
///
/// The OID tiebreak gives every entry a distinct position, so duplicate keys
/// in non-unique indexes still have a total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub key: Key,
    pub oid: Oid,
}

impl IndexEntry {
    #[must_use]
    pub const fn new(key: Key, oid: Oid) -> Self {
        Self { key, oid }
    }

    fn encode(&self, writer: &mut ByteWriter) {
        self.key.encode(writer);
        writer.write_u64(self.oid);
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let key = Key::decode(reader)?;
        let oid = reader.read_u64()?;
        Ok(Self { key, oid })
    }
}

/// Index metadata stored under the index's own OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub root: Oid,
    /// Number of stored entries.
    pub count: u64,
    /// Levels below the root; 0 when the root is a leaf.
    pub height: u32,
    pub unique: bool,
    /// Maximum entries per leaf and children per internal node.
    pub capacity: u16,
    pub shape: KeyShape,
}

impl IndexHeader {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(32);
        writer.write_u8(TAG_INDEX_HEADER);
        writer.write_u64(self.root);
        writer.write_u64(self.count);
        writer.write_u32(self.height);
        writer.write_u8(u8::from(self.unique));
        writer.write_u16(self.capacity);
        self.shape.encode(&mut writer);
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        expect_tag(&mut reader, TAG_INDEX_HEADER, "index header")?;
        let header = Self {
            root: reader.read_u64()?,
            count: reader.read_u64()?,
            height: reader.read_u32()?,
            unique: reader.read_u8()? != 0,
            capacity: reader.read_u16()?,
            shape: KeyShape::decode(&mut reader)?,
        };
        reader.finish()?;
        Ok(header)
    }
}

/// A leaf node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    pub prev: Oid,
    pub next: Oid,
    /// Entries in ascending order.
    pub entries: Vec<IndexEntry>,
}

impl LeafNode {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prev: NULL_OID,
            next: NULL_OID,
            entries: Vec::new(),
        }
    }

    /// Position of the first entry for which `is_before` is false.
    pub fn position(&self, is_before: impl FnMut(&IndexEntry) -> bool) -> usize {
        self.entries.partition_point(is_before)
    }

    /// Find an exact entry, or where it would be inserted.
    pub fn find(&self, entry: &IndexEntry) -> Result<usize, usize> {
        self.entries.binary_search(entry)
    }

    /// Move the upper half of the entries into a new right sibling.
    ///
    /// The right node's first entry becomes the separator. Sibling links
    /// are left to the caller, which knows the OIDs.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let mid = self.entries.len() / 2;
        Self {
            prev: NULL_OID,
            next: self.next,
            entries: self.entries.split_off(mid),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(21 + self.entries.len() * 24);
        writer.write_u8(TAG_LEAF);
        writer.write_u64(self.prev);
        writer.write_u64(self.next);
        writer.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            entry.encode(&mut writer);
        }
        writer.into_bytes()
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let prev = reader.read_u64()?;
        let next = reader.read_u64()?;
        let n = reader.read_u32()? as usize;
        let mut entries = Vec::with_capacity(n.min(reader.remaining()));
        for _ in 0..n {
            entries.push(IndexEntry::decode(reader)?);
        }
        Ok(Self {
            prev,
            next,
            entries,
        })
    }
}

/// An internal node.
///
/// `children[i]` holds entries < `separators[i]`;
/// `children[i + 1]` holds entries >= `separators[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalNode {
    pub separators: Vec<IndexEntry>,
    /// `children.len() == separators.len() + 1`
    pub children: Vec<Oid>,
}

impl InternalNode {
    /// A node with two children, used when the root splits.
    #[must_use]
    pub fn with_children(left: Oid, separator: IndexEntry, right: Oid) -> Self {
        Self {
            separators: vec![separator],
            children: vec![left, right],
        }
    }

    /// Index of the child to descend into: the number of separators for
    /// which `is_before` holds.
    pub fn child_index(&self, is_before: impl FnMut(&IndexEntry) -> bool) -> usize {
        self.separators.partition_point(is_before)
    }

    /// Insert a separator and the child to its right.
    pub fn insert(&mut self, index: usize, separator: IndexEntry, right_child: Oid) {
        self.separators.insert(index, separator);
        self.children.insert(index + 1, right_child);
    }

    /// Split the node, returning the median separator and the new right node.
    ///
    /// The left half keeps `(children + 1) / 2` children. Returns `None` for
    /// a node with fewer than two children.
    #[must_use]
    pub fn split(&mut self) -> Option<(IndexEntry, Self)> {
        if self.children.len() < 2 || self.separators.len() + 1 != self.children.len() {
            return None;
        }
        let keep = self.children.len().div_ceil(2);
        let right_children = self.children.split_off(keep);
        let right_separators = self.separators.split_off(keep);
        let median = self.separators.pop()?;
        Some((
            median,
            Self {
                separators: right_separators,
                children: right_children,
            },
        ))
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(13 + self.separators.len() * 32);
        writer.write_u8(TAG_INTERNAL);
        writer.write_u32(self.separators.len() as u32);
        writer.write_u64(self.children.first().copied().unwrap_or(NULL_OID));
        for (separator, child) in self.separators.iter().zip(self.children.iter().skip(1)) {
            separator.encode(&mut writer);
            writer.write_u64(*child);
        }
        writer.into_bytes()
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let n = reader.read_u32()? as usize;
        let mut separators = Vec::with_capacity(n.min(reader.remaining()));
        let mut children = Vec::with_capacity(n.min(reader.remaining()) + 1);
        children.push(reader.read_u64()?);
        for _ in 0..n {
            separators.push(IndexEntry::decode(reader)?);
            children.push(reader.read_u64()?);
        }
        Ok(Self {
            separators,
            children,
        })
    }
}

/// Either kind of tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Leaf(leaf) => leaf.encode(),
            Self::Internal(internal) => internal.encode(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let node = match reader.read_u8()? {
            TAG_LEAF => Self::Leaf(LeafNode::decode_body(&mut reader)?),
            TAG_INTERNAL => Self::Internal(InternalNode::decode_body(&mut reader)?),
            tag => {
                return Err(CodecError::InvalidTag {
                    what: "index node",
                    tag,
                });
            }
        };
        reader.finish()?;
        Ok(node)
    }

    /// Occupancy: entries for a leaf, children for an internal node.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.entries.len(),
            Self::Internal(internal) => internal.children.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn expect_tag(reader: &mut ByteReader<'_>, tag: u8, what: &'static str) -> Result<(), CodecError> {
    match reader.read_u8()? {
        t if t == tag => Ok(()),
        t => Err(CodecError::InvalidTag { what, tag: t }),
    }
}

fn malformed(tag: u8, e: &CodecError) -> TraceError {
    TraceError::Malformed {
        tag,
        reason: e.to_string(),
    }
}

/// References of an index header: its root node.
#[derive(Debug, Clone, Copy)]
pub struct IndexHeaderDescriptor;

impl TypeDescriptor for IndexHeaderDescriptor {
    fn tag(&self) -> u8 {
        TAG_INDEX_HEADER
    }

    fn name(&self) -> &str {
        "IndexHeader"
    }

    fn child_references(&self, bytes: &[u8]) -> Result<Vec<Oid>, TraceError> {
        let header = IndexHeader::decode(bytes).map_err(|e| malformed(TAG_INDEX_HEADER, &e))?;
        Ok(if header.root == NULL_OID {
            Vec::new()
        } else {
            vec![header.root]
        })
    }
}

/// References of a leaf: its siblings and every indexed object.
#[derive(Debug, Clone, Copy)]
pub struct LeafDescriptor;

impl TypeDescriptor for LeafDescriptor {
    fn tag(&self) -> u8 {
        TAG_LEAF
    }

    fn name(&self) -> &str {
        "LeafNode"
    }

    fn child_references(&self, bytes: &[u8]) -> Result<Vec<Oid>, TraceError> {
        let Node::Leaf(leaf) = Node::decode(bytes).map_err(|e| malformed(TAG_LEAF, &e))? else {
            return Err(TraceError::Malformed {
                tag: TAG_LEAF,
                reason: "not a leaf".to_owned(),
            });
        };
        Ok([leaf.prev, leaf.next]
            .into_iter()
            .chain(leaf.entries.iter().map(|e| e.oid))
            .filter(|&oid| oid != NULL_OID)
            .collect())
    }
}

/// References of an internal node: its children.
#[derive(Debug, Clone, Copy)]
pub struct InternalDescriptor;

impl TypeDescriptor for InternalDescriptor {
    fn tag(&self) -> u8 {
        TAG_INTERNAL
    }

    fn name(&self) -> &str {
        "InternalNode"
    }

    fn child_references(&self, bytes: &[u8]) -> Result<Vec<Oid>, TraceError> {
        let Node::Internal(internal) =
            Node::decode(bytes).map_err(|e| malformed(TAG_INTERNAL, &e))?
        else {
            return Err(TraceError::Malformed {
                tag: TAG_INTERNAL,
                reason: "not an internal node".to_owned(),
            });
        };
        Ok(internal
            .children
            .into_iter()
            .filter(|&oid| oid != NULL_OID)
            .collect())
    }
}

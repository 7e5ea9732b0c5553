//! B-tree indexes stored as objects.
//!
//! Every node is an object in the store and links to its children and
//! siblings by OID. Leaves form a doubly-linked chain for range scans.
//!
//! # Usage
//!
//! ```
//! use oidstore::storage::btree::{BTree, DEFAULT_NODE_CAPACITY};
//! use oidstore::storage::MemoryStore;
//! use oidstore::types::{Key, KeyKind, KeyShape};
//!
//! let mut store = MemoryStore::new();
//! let index = BTree::create(
//!     &mut store,
//!     KeyShape::Scalar(KeyKind::I32),
//!     true,
//!     DEFAULT_NODE_CAPACITY,
//! )
//! .unwrap();
//!
//! index.put(&mut store, Key::from(7i32), 42).unwrap();
//! assert_eq!(index.get(&store, &Key::from(7i32)).unwrap(), Some(42));
//! ```

mod cursor;
pub mod node;
mod tree;

pub use cursor::RangeIter;
pub use node::{IndexEntry, IndexHeader, InternalNode, LeafNode, Node};
pub use tree::{BTree, BTreeError, DEFAULT_NODE_CAPACITY, IterationOrder, MIN_NODE_CAPACITY};

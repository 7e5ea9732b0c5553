//! Object storage engine.
//!
//! Everything persistent is an object: a byte blob addressed by an OID and
//! reached through the [`ObjectStore`] trait. Indexes, sets and application
//! records are all built on that one abstraction.
//!
//! # File Format
//!
//! [`FileStore`] keeps the objects in a single file with 8KB pages:
//!
//! - Page 0: Superblock (root OID, object table location, OID limit)
//! - Object table: one slot per OID naming the pages holding its bytes
//! - Remaining pages: object data, each object in a contiguous run
//!
//! # Usage
//!
//! ```ignore
//! use storage::{FileStore, ObjectStore};
//!
//! let mut store = FileStore::open_or_create(path)?;
//!
//! let oid = store.allocate()?;
//! store.put(oid, b"hello".to_vec())?;
//! store.set_root(oid);
//!
//! // Nothing reaches the file until commit
//! store.commit()?;
//! ```

mod allocator;
mod bitmap;
pub mod btree;
mod codec;
mod descriptor;
mod file;
pub mod gc;
pub mod indexes;
mod page;
mod store;
mod superblock;

pub use bitmap::Bitmap;
pub use btree::{BTree, BTreeError, IterationOrder, RangeIter};
pub use codec::{ByteReader, ByteWriter, CodecError};
pub use descriptor::{
    FIRST_APPLICATION_TAG, TAG_INDEX_HEADER, TAG_INTERNAL, TAG_LEAF, TraceError, TypeDescriptor,
    TypeRegistry,
};
pub use file::FileStore;
pub use gc::{GcFailure, GcFailureKind, GcReport, collect_garbage, mark_reachable};
pub use indexes::{FieldIndex, IndexError, PersistentSet};
pub use page::{PAGE_SIZE, PageId};
pub use store::{MemoryStore, ObjectStore, StoreError};
pub use superblock::SuperblockError;

//! Index wrappers built on the B-tree.
//!
//! - Field index: key derived from a stored record's fields -> record OID
//! - Persistent set: member OID -> member OID, unique

mod field;
mod set;

pub use field::FieldIndex;
pub use set::PersistentSet;

use crate::storage::btree::BTreeError;
use crate::storage::store::StoreError;
use crate::types::RecordError;

/// Errors from the index wrappers.
#[derive(Debug)]
pub enum IndexError {
    /// B-tree error.
    Tree(BTreeError),
    /// Store error while reading an indexed record.
    Store(StoreError),
    /// The record could not be turned into a key.
    Record(RecordError),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "index error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Record(e) => write!(f, "record error: {e}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Record(e) => Some(e),
        }
    }
}

impl From<BTreeError> for IndexError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<StoreError> for IndexError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RecordError> for IndexError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

//! Object store abstraction.
//!
//! The engine never touches files or pages directly: every persistent
//! structure is an opaque byte blob addressed by an [`Oid`], read and written
//! through the [`ObjectStore`] trait. This keeps the index and GC code
//! independent of the backing medium and lets tests run against the
//! in-memory [`MemoryStore`].
//!
//! # Transactions
//!
//! All writes since the last `commit` form one unit: `commit` makes them
//! durable together and `rollback` discards them, restoring object bytes,
//! allocation state, the OID counter and the root.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::storage::codec::CodecError;
use crate::storage::superblock::SuperblockError;
use crate::types::{NULL_OID, Oid};

/// Abstraction over an OID-addressed object heap.
///
/// Implementations must ensure:
/// - `allocate` never returns `NULL_OID` and never returns an OID that is
///   currently allocated
/// - `get` returns the bytes of the last `put` for that OID in the current
///   transaction, or the last committed bytes
/// - `rollback` restores exactly the state of the last `commit`
pub trait ObjectStore {
    /// Reserve a fresh OID. It holds no bytes until the first `put`.
    fn allocate(&mut self) -> Result<Oid, StoreError>;

    /// Read the bytes of an object.
    fn get(&self, oid: Oid) -> Result<Vec<u8>, StoreError>;

    /// Replace the bytes of an allocated object.
    fn put(&mut self, oid: Oid, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Release an object; its OID may be reused by later allocations.
    fn free(&mut self, oid: Oid) -> Result<(), StoreError>;

    /// Make every change since the last commit durable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every change since the last commit.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// The application root object, or `NULL_OID`.
    fn root(&self) -> Oid;

    /// Set the application root object.
    fn set_root(&mut self, oid: Oid);

    /// Exclusive upper bound of every OID issued so far.
    fn oid_limit(&self) -> Oid;

    /// Whether `oid` is currently allocated.
    fn is_allocated(&self, oid: Oid) -> bool;
}

/// Errors that can occur during object store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// The OID is not allocated or has never been written.
    ObjectNotFound(Oid),
    /// `NULL_OID` was passed where an object is required.
    NullOid,
    /// The object is too large for the store format.
    ObjectTooLarge { oid: Oid, len: usize },
    /// Stored bytes failed validation.
    Corruption(String),
    /// Page 0 is not a valid superblock.
    InvalidSuperblock(SuperblockError),
    /// The store file already exists.
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ObjectNotFound(oid) => write!(f, "object {oid} not found"),
            Self::NullOid => write!(f, "null OID"),
            Self::ObjectTooLarge { oid, len } => {
                write!(f, "object {oid} of {len} bytes is too large")
            }
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InvalidSuperblock(e) => write!(f, "invalid superblock: {e}"),
            Self::AlreadyExists(path) => write!(f, "store already exists: {}", path.display()),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidSuperblock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StoreError {
    fn from(e: SuperblockError) -> Self {
        Self::InvalidSuperblock(e)
    }
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        Self::Corruption(e.to_string())
    }
}

/// State captured at the first change after a commit.
#[derive(Debug)]
struct UndoLog {
    /// Prior slot of every touched OID (`None` = was not allocated).
    objects: HashMap<Oid, Option<Option<Vec<u8>>>>,
    free_oids: Vec<Oid>,
    next_oid: Oid,
    root: Oid,
}

/// In-memory object store with commit/rollback.
///
/// Allocated OIDs map to `None` until their first `put`.
#[derive(Debug)]
pub struct MemoryStore {
    objects: HashMap<Oid, Option<Vec<u8>>>,
    free_oids: Vec<Oid>,
    next_oid: Oid,
    root: Oid,
    undo: Option<UndoLog>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            free_oids: Vec::new(),
            next_oid: 1,
            root: NULL_OID,
            undo: None,
        }
    }

    /// Number of allocated objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Whether there are uncommitted changes.
    #[must_use]
    pub const fn has_pending_changes(&self) -> bool {
        self.undo.is_some()
    }

    fn undo_log(&mut self) -> &mut UndoLog {
        self.undo.get_or_insert_with(|| UndoLog {
            objects: HashMap::new(),
            free_oids: self.free_oids.clone(),
            next_oid: self.next_oid,
            root: self.root,
        })
    }

    /// Remember the committed slot of `oid` before its first change.
    fn touch(&mut self, oid: Oid) {
        let prior = self.objects.get(&oid).cloned();
        self.undo_log().objects.entry(oid).or_insert(prior);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn allocate(&mut self) -> Result<Oid, StoreError> {
        self.undo_log();
        let oid = match self.free_oids.pop() {
            Some(oid) => oid,
            None => {
                let oid = self.next_oid;
                self.next_oid += 1;
                oid
            }
        };
        self.touch(oid);
        self.objects.insert(oid, None);
        Ok(oid)
    }

    fn get(&self, oid: Oid) -> Result<Vec<u8>, StoreError> {
        if oid == NULL_OID {
            return Err(StoreError::NullOid);
        }
        match self.objects.get(&oid) {
            Some(Some(bytes)) => Ok(bytes.clone()),
            _ => Err(StoreError::ObjectNotFound(oid)),
        }
    }

    fn put(&mut self, oid: Oid, bytes: Vec<u8>) -> Result<(), StoreError> {
        if oid == NULL_OID {
            return Err(StoreError::NullOid);
        }
        if !self.objects.contains_key(&oid) {
            return Err(StoreError::ObjectNotFound(oid));
        }
        self.touch(oid);
        self.objects.insert(oid, Some(bytes));
        Ok(())
    }

    fn free(&mut self, oid: Oid) -> Result<(), StoreError> {
        if oid == NULL_OID {
            return Err(StoreError::NullOid);
        }
        if !self.objects.contains_key(&oid) {
            return Err(StoreError::ObjectNotFound(oid));
        }
        self.touch(oid);
        self.objects.remove(&oid);
        self.free_oids.push(oid);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(undo) = self.undo.take() {
            tracing::debug!(
                "memory store commit: {} objects changed, {} allocated",
                undo.objects.len(),
                self.objects.len()
            );
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let Some(undo) = self.undo.take() else {
            return Ok(());
        };
        tracing::debug!("memory store rollback: {} objects restored", undo.objects.len());
        for (oid, prior) in undo.objects {
            match prior {
                Some(slot) => {
                    self.objects.insert(oid, slot);
                }
                None => {
                    self.objects.remove(&oid);
                }
            }
        }
        self.free_oids = undo.free_oids;
        self.next_oid = undo.next_oid;
        self.root = undo.root;
        Ok(())
    }

    fn root(&self) -> Oid {
        self.root
    }

    fn set_root(&mut self, oid: Oid) {
        self.undo_log();
        self.root = oid;
    }

    fn oid_limit(&self) -> Oid {
        self.next_oid
    }

    fn is_allocated(&self, oid: Oid) -> bool {
        self.objects.contains_key(&oid)
    }
}

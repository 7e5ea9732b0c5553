// Life of an object:
// 1. The application allocates an OID and puts the record's bytes
// 2. Indexes over the record are updated through the same store
//     - Field indexes re-read the record to derive its key
//     - Sets index the OID itself
// 3. Commit makes every write since the last commit durable at once
// 4. Once nothing reachable from the root refers to it, GC frees it
//
// System components:
//  - Object store (memory or single file)
//  - B-tree indexes stored as objects
//  - Reentrant resource lock for cross-thread coordination
//  - Reachability GC

pub mod config;
pub mod resource;
pub mod storage;
pub mod types;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use resource::{LockError, LockGuard, LockStatus, ResourceLock};

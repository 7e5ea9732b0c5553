//! Reachability garbage collection.
//!
//! A mark pass walks the object graph from a set of roots using the type
//! registry to find each object's outbound references, then every allocated
//! OID that was never reached is reported as garbage.
//!
//! # Design
//!
//! Two bitmaps cover the OID space up to the store's `oid_limit`:
//! - `pending`: reached but not yet traced
//! - `reached`: traced (or found untraceable)
//!
//! Each pass drains the OIDs set in `pending` and may set new ones. The mark
//! ends at the fixpoint where a pass adds nothing.
//!
//! Objects that cannot be read or traced, and references to OIDs that are not
//! allocated, are recorded as [`GcFailure`]s and the pass carries on. A
//! collection that saw failures does not free anything, since an object it
//! could not trace may hold the only reference to a live one.
//!
//! The pass borrows the store for its whole duration, so no other mutation
//! can interleave with it.

use crate::storage::bitmap::Bitmap;
use crate::storage::descriptor::{TraceError, TypeRegistry};
use crate::storage::store::{ObjectStore, StoreError};
use crate::types::{NULL_OID, Oid};

/// Outcome of a reachability pass.
#[derive(Debug)]
pub struct GcReport {
    /// OIDs reached from the roots.
    pub reached: Bitmap,
    /// Allocated OIDs that were not reached, ascending.
    pub unreachable: Vec<Oid>,
    /// Number of unreachable OIDs actually freed.
    pub reclaimed: usize,
    /// Per-object problems found while tracing.
    pub failures: Vec<GcFailure>,
    /// Number of passes over the pending bitmap.
    pub passes: u32,
}

impl GcReport {
    /// Whether `oid` was reached.
    #[must_use]
    pub fn is_reached(&self, oid: Oid) -> bool {
        oid < self.reached.len() && self.reached.get(oid)
    }

    /// Number of reached OIDs.
    #[must_use]
    pub fn reached_count(&self) -> u64 {
        self.reached.count_ones()
    }
}

/// A problem with one object found during marking.
#[derive(Debug)]
pub struct GcFailure {
    /// The object being traced, or the root that could not be seeded.
    pub oid: Oid,
    pub kind: GcFailureKind,
}

#[derive(Debug)]
pub enum GcFailureKind {
    /// The object refers to an OID that is not allocated.
    DanglingReference(Oid),
    /// A root OID is not allocated.
    MissingRoot,
    /// The object's bytes could not be read.
    Unreadable(StoreError),
    /// The object's references could not be listed.
    Untraceable(TraceError),
}

impl std::fmt::Display for GcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let oid = self.oid;
        match &self.kind {
            GcFailureKind::DanglingReference(target) => {
                write!(f, "object {oid} refers to unallocated object {target}")
            }
            GcFailureKind::MissingRoot => write!(f, "root {oid} is not allocated"),
            GcFailureKind::Unreadable(e) => write!(f, "object {oid} could not be read: {e}"),
            GcFailureKind::Untraceable(e) => write!(f, "object {oid} could not be traced: {e}"),
        }
    }
}

/// Mark every object reachable from `roots`.
///
/// Never fails as a whole; problems with individual objects are collected in
/// [`GcReport::failures`]. `NULL_OID` roots are ignored.
pub fn mark_reachable<S: ObjectStore>(
    store: &S,
    roots: &[Oid],
    registry: &TypeRegistry,
) -> GcReport {
    let limit = store.oid_limit();
    let mut reached = Bitmap::new(limit);
    let mut pending = Bitmap::new(limit);
    let mut failures = Vec::new();
    let is_live = |oid: Oid| oid != NULL_OID && oid < limit && store.is_allocated(oid);

    for &root in roots {
        if root == NULL_OID {
            continue;
        }
        if is_live(root) {
            pending.set(root);
        } else {
            record(&mut failures, root, GcFailureKind::MissingRoot);
        }
    }

    let mut passes = 0;
    loop {
        let batch: Vec<Oid> = pending.iter_ones().collect();
        if batch.is_empty() {
            break;
        }
        passes += 1;
        for oid in batch {
            pending.clear(oid);
            reached.set(oid);
            let references = match store.get(oid) {
                Ok(bytes) => match registry.references(&bytes) {
                    Ok(references) => references,
                    Err(e) => {
                        record(&mut failures, oid, GcFailureKind::Untraceable(e));
                        continue;
                    }
                },
                Err(e) => {
                    record(&mut failures, oid, GcFailureKind::Unreadable(e));
                    continue;
                }
            };
            for target in references {
                if !is_live(target) {
                    record(&mut failures, oid, GcFailureKind::DanglingReference(target));
                } else if !reached.get(target) {
                    pending.set(target);
                }
            }
        }
    }

    let unreachable: Vec<Oid> = (1..limit)
        .filter(|&oid| store.is_allocated(oid) && !reached.get(oid))
        .collect();

    let report = GcReport {
        reached,
        unreachable,
        reclaimed: 0,
        failures,
        passes,
    };
    tracing::info!(
        "reachability pass: reached={} unreachable={} failures={} passes={}",
        report.reached_count(),
        report.unreachable.len(),
        report.failures.len(),
        report.passes
    );
    report
}

/// Mark from the store root and free every unreachable object.
///
/// Nothing is freed if marking reported failures. The frees are ordinary
/// store changes; the caller commits or rolls them back.
pub fn collect_garbage<S: ObjectStore>(
    store: &mut S,
    registry: &TypeRegistry,
) -> Result<GcReport, StoreError> {
    let root = store.root();
    let mut report = mark_reachable(&*store, &[root], registry);

    if !report.failures.is_empty() {
        tracing::warn!(
            "skipping reclamation of {} objects: {} tracing failures",
            report.unreachable.len(),
            report.failures.len()
        );
        return Ok(report);
    }

    for &oid in &report.unreachable {
        store.free(oid)?;
        report.reclaimed += 1;
    }
    tracing::info!("reclaimed {} unreachable objects", report.reclaimed);
    Ok(report)
}

fn record(failures: &mut Vec<GcFailure>, oid: Oid, kind: GcFailureKind) {
    let failure = GcFailure { oid, kind };
    tracing::warn!("gc: {}", failure);
    failures.push(failure);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::{BTree, IterationOrder};
    use crate::storage::store::MemoryStore;
    use crate::types::{FieldDescriptor, FieldValue, Key, KeyKind, KeyShape, RecordSchema};

    fn link_schema() -> RecordSchema {
        RecordSchema::new(
            0x40,
            "Link",
            vec![
                FieldDescriptor::scalar("id", KeyKind::I64),
                FieldDescriptor::reference("next"),
            ],
        )
        .expect("valid schema")
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(Box::new(link_schema()));
        registry
    }

    fn put_link(store: &mut MemoryStore, id: i64, next: Oid) -> Oid {
        let record = link_schema()
            .record(vec![FieldValue::scalar(id), FieldValue::Reference(next)])
            .expect("valid record");
        let oid = store.allocate().expect("allocate");
        store.put(oid, record.encode()).expect("put");
        oid
    }

    #[test]
    fn test_marks_chain_and_finds_garbage() {
        let mut store = MemoryStore::new();
        let tail = put_link(&mut store, 3, NULL_OID);
        let middle = put_link(&mut store, 2, tail);
        let head = put_link(&mut store, 1, middle);
        let orphan = put_link(&mut store, 9, tail);

        let report = mark_reachable(&store, &[head], &registry());

        assert!(report.failures.is_empty());
        assert!(report.is_reached(head));
        assert!(report.is_reached(middle));
        assert!(report.is_reached(tail));
        assert!(!report.is_reached(orphan));
        assert_eq!(report.unreachable, vec![orphan]);
        assert_eq!(report.reached_count(), 3);
        assert_eq!(report.passes, 3);
    }

    #[test]
    fn test_cycles_terminate() {
        let mut store = MemoryStore::new();
        let a = put_link(&mut store, 1, NULL_OID);
        let b = put_link(&mut store, 2, a);
        let record = link_schema()
            .record(vec![FieldValue::scalar(1i64), FieldValue::Reference(b)])
            .expect("valid record");
        store.put(a, record.encode()).expect("close the cycle");

        let report = mark_reachable(&store, &[a], &registry());
        assert!(report.failures.is_empty());
        assert_eq!(report.reached_count(), 2);
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn test_dangling_reference_blocks_reclamation() {
        let mut store = MemoryStore::new();
        let head = put_link(&mut store, 1, 500);
        let orphan = put_link(&mut store, 2, NULL_OID);
        store.set_root(head);

        let report = collect_garbage(&mut store, &registry()).expect("collect");

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].kind,
            GcFailureKind::DanglingReference(500)
        ));
        assert_eq!(report.unreachable, vec![orphan]);
        assert_eq!(report.reclaimed, 0);
        assert!(store.is_allocated(orphan));
    }

    #[test]
    fn test_unknown_tag_is_reported_and_pass_continues() {
        let mut store = MemoryStore::new();
        let stranger = store.allocate().expect("allocate");
        store.put(stranger, vec![0x7f, 1, 2, 3]).expect("put");
        let tail = put_link(&mut store, 2, NULL_OID);
        let head = put_link(&mut store, 1, tail);

        let report = mark_reachable(&store, &[stranger, head], &registry());

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].oid, stranger);
        assert!(matches!(
            report.failures[0].kind,
            GcFailureKind::Untraceable(TraceError::UnknownTag(0x7f))
        ));
        assert!(report.is_reached(tail));
    }

    #[test]
    fn test_missing_root_is_reported() {
        let store = MemoryStore::new();
        let report = mark_reachable(&store, &[NULL_OID, 12], &registry());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].kind, GcFailureKind::MissingRoot));
        assert_eq!(report.passes, 0);
    }

    #[test]
    fn test_emptied_index_nodes_become_unreachable() {
        let mut store = MemoryStore::new();
        let tree = BTree::create(&mut store, KeyShape::Scalar(KeyKind::I64), true, 4)
            .expect("create tree");
        store.set_root(tree.oid());

        let mut records = Vec::new();
        for i in 0..60i64 {
            let oid = put_link(&mut store, i, NULL_OID);
            tree.put(&mut store, Key::from(i), oid).expect("put");
            records.push((i, oid));
        }
        let registry = registry();
        let full = mark_reachable(&store, &[store.root()], &registry);
        assert!(full.failures.is_empty());
        assert!(full.unreachable.is_empty());
        let nodes_before: Vec<Oid> = (1..store.oid_limit())
            .filter(|&oid| full.is_reached(oid) && !records.iter().any(|&(_, r)| r == oid))
            .collect();
        assert!(nodes_before.len() > 3);

        tree.clear(&mut store).expect("clear");
        let report = collect_garbage(&mut store, &registry).expect("collect");

        let new_root = tree.header(&store).expect("header").root;
        for oid in nodes_before {
            if oid != tree.oid() {
                assert!(!report.is_reached(oid), "old node {oid} still reached");
            }
        }
        assert!(report.is_reached(new_root));
        assert!(report.is_reached(tree.oid()));
        for (_, oid) in &records {
            assert!(!store.is_allocated(*oid), "record {oid} not reclaimed");
        }
        assert_eq!(
            tree.iter(&store, IterationOrder::Ascending).expect("iter").count(),
            0
        );
        assert_eq!(report.reclaimed, report.unreachable.len());
    }

    #[test]
    fn test_collect_frees_garbage_and_rollback_restores_it() {
        let mut store = MemoryStore::new();
        let head = put_link(&mut store, 1, NULL_OID);
        let orphan = put_link(&mut store, 2, NULL_OID);
        store.set_root(head);
        store.commit().expect("commit");

        let report = collect_garbage(&mut store, &registry()).expect("collect");
        assert_eq!(report.reclaimed, 1);
        assert!(!store.is_allocated(orphan));
        assert!(store.is_allocated(head));

        store.rollback().expect("rollback");
        assert!(store.is_allocated(orphan));
    }
}

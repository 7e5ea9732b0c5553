//! Type descriptors: how the engine finds references inside stored objects.
//!
//! Every object written by the engine or an application starts with a
//! one-byte type tag. A [`TypeRegistry`] maps tags to [`TypeDescriptor`]s,
//! which decode an object's bytes just far enough to list the OIDs it points
//! at. The garbage collector uses this to walk the object graph.

use std::collections::HashMap;

use crate::storage::btree::node::{IndexHeaderDescriptor, InternalDescriptor, LeafDescriptor};
use crate::types::Oid;

/// Tag of a B-tree index header object.
pub const TAG_INDEX_HEADER: u8 = 0x01;
/// Tag of a B-tree leaf node.
pub const TAG_LEAF: u8 = 0x02;
/// Tag of a B-tree internal node.
pub const TAG_INTERNAL: u8 = 0x03;
/// Lowest tag available to application records.
pub const FIRST_APPLICATION_TAG: u8 = 0x10;

/// Knows the layout of one object type.
pub trait TypeDescriptor: Send + Sync {
    /// The tag byte objects of this type start with.
    fn tag(&self) -> u8;

    /// Type name used in diagnostics.
    fn name(&self) -> &str;

    /// OIDs referenced by the object, never `NULL_OID`, in no particular
    /// order.
    fn child_references(&self, bytes: &[u8]) -> Result<Vec<Oid>, TraceError>;
}

/// Tag to descriptor lookup.
pub struct TypeRegistry {
    descriptors: HashMap<u8, Box<dyn TypeDescriptor>>,
}

impl TypeRegistry {
    /// A registry that knows the engine's own index objects.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(IndexHeaderDescriptor));
        registry.register(Box::new(LeafDescriptor));
        registry.register(Box::new(InternalDescriptor));
        registry
    }

    /// A registry with no descriptors at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Register a descriptor under its tag, returning the one it replaces.
    pub fn register(
        &mut self,
        descriptor: Box<dyn TypeDescriptor>,
    ) -> Option<Box<dyn TypeDescriptor>> {
        self.descriptors.insert(descriptor.tag(), descriptor)
    }

    #[must_use]
    pub fn get(&self, tag: u8) -> Option<&dyn TypeDescriptor> {
        self.descriptors.get(&tag).map(AsRef::as_ref)
    }

    /// Dispatch on the object's tag byte and list its references.
    pub fn references(&self, bytes: &[u8]) -> Result<Vec<Oid>, TraceError> {
        let &tag = bytes.first().ok_or(TraceError::Empty)?;
        let descriptor = self.get(tag).ok_or(TraceError::UnknownTag(tag))?;
        descriptor.child_references(bytes)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self
            .descriptors
            .values()
            .map(|d| (d.tag(), d.name().to_owned()))
            .collect();
        tags.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &tags).finish()
    }
}

/// Why an object's references could not be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// The object has no bytes, so no tag.
    Empty,
    /// No descriptor is registered for the tag.
    UnknownTag(u8),
    /// The descriptor could not decode the bytes.
    Malformed { tag: u8, reason: String },
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty object"),
            Self::UnknownTag(tag) => write!(f, "no type registered for tag 0x{tag:02x}"),
            Self::Malformed { tag, reason } => {
                write!(f, "malformed object of type 0x{tag:02x}: {reason}")
            }
        }
    }
}

impl std::error::Error for TraceError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDescriptor, FieldValue, KeyKind, RecordSchema};

    fn node_schema() -> RecordSchema {
        RecordSchema::new(
            0x30,
            "ListNode",
            vec![
                FieldDescriptor::scalar("value", KeyKind::I64),
                FieldDescriptor::reference("next"),
            ],
        )
        .expect("schema")
    }

    #[test]
    fn test_default_registry_knows_index_objects() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.len(), 3);
        assert!(registry.get(TAG_INDEX_HEADER).is_some());
        assert!(registry.get(TAG_LEAF).is_some());
        assert!(registry.get(TAG_INTERNAL).is_some());
    }

    #[test]
    fn test_references_dispatch_on_tag() {
        let mut registry = TypeRegistry::new();
        let schema = node_schema();
        registry.register(Box::new(schema.clone()));

        let bytes = schema
            .record(vec![FieldValue::scalar(5i64), FieldValue::Reference(12)])
            .expect("record")
            .encode();
        assert_eq!(registry.references(&bytes).expect("trace"), vec![12]);
    }

    #[test]
    fn test_unknown_and_empty_objects_fail() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.references(&[]), Err(TraceError::Empty));
        assert_eq!(registry.references(&[0x77, 0]), Err(TraceError::UnknownTag(0x77)));
    }
}

pub mod key;
pub mod record;

pub use key::{Key, KeyKind, KeyShape, Scalar};
pub use record::{
    FieldDescriptor, FieldKey, FieldKind, FieldValue, KeyExtractor, Record, RecordError,
    RecordSchema,
};

/// Identifier of a stored object.
///
/// OIDs are opaque to callers; `NULL_OID` (0) is never issued and means
/// "no object".
pub type Oid = u64;

/// The reserved "no object" identifier.
pub const NULL_OID: Oid = 0;

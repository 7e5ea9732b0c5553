//! Application records and explicit schema descriptors.
//!
//! A [`Record`] is an ordered list of field values stored as one object. Its
//! [`RecordSchema`] names the fields, fixes their kinds and owns the record's
//! type tag, which is how the garbage collector finds the record's outbound
//! references and how [`FieldKey`] pulls index keys out of record bytes.
//!
//! # Encoding
//!
//! `tag (1) | field count (2) | value*`, where a value is `0x00 | scalar` or
//! `0x01 | oid (8)`.

use std::collections::HashSet;
use std::fmt;

use crate::storage::{
    ByteReader, ByteWriter, CodecError, FIRST_APPLICATION_TAG, TraceError, TypeDescriptor,
};
use crate::types::key::{Key, KeyKind, KeyShape, MAX_COMPOUND_ARITY, Scalar};
use crate::types::{NULL_OID, Oid};

const VALUE_SCALAR: u8 = 0x00;
const VALUE_REFERENCE: u8 = 0x01;

/// The declared kind of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(KeyKind),
    /// OID of another object; traced by the garbage collector.
    Reference,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => write!(f, "{kind}"),
            Self::Reference => f.write_str("reference"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    #[must_use]
    pub fn scalar(name: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar(kind),
        }
    }

    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference,
        }
    }
}

/// A stored field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scalar(Scalar),
    Reference(Oid),
}

impl FieldValue {
    const fn matches(&self, kind: FieldKind) -> bool {
        match (self, kind) {
            (Self::Scalar(s), FieldKind::Scalar(k)) => s.kind() as u8 == k as u8,
            (Self::Reference(_), FieldKind::Reference) => true,
            _ => false,
        }
    }

    /// Shorthand for a scalar value.
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

/// An application object: a type tag and its field values in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tag: u8,
    pub values: Vec<FieldValue>,
}

impl Record {
    #[must_use]
    pub const fn new(tag: u8, values: Vec<FieldValue>) -> Self {
        Self { tag, values }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // schemas cap the field count at u16::MAX
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(3 + self.values.len() * 10);
        writer.write_u8(self.tag);
        writer.write_u16(self.values.len() as u16);
        for value in &self.values {
            match value {
                FieldValue::Scalar(s) => {
                    writer.write_u8(VALUE_SCALAR);
                    s.encode(&mut writer);
                }
                FieldValue::Reference(oid) => {
                    writer.write_u8(VALUE_REFERENCE);
                    writer.write_u64(*oid);
                }
            }
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let tag = reader.read_u8()?;
        let count = reader.read_u16()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let value = match reader.read_u8()? {
                VALUE_SCALAR => FieldValue::Scalar(Scalar::decode(&mut reader)?),
                VALUE_REFERENCE => FieldValue::Reference(reader.read_u64()?),
                tag => {
                    return Err(CodecError::InvalidTag {
                        what: "field value",
                        tag,
                    });
                }
            };
            values.push(value);
        }
        reader.finish()?;
        Ok(Self { tag, values })
    }
}

/// Describes one application record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    tag: u8,
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl RecordSchema {
    /// Create a schema. Tags below `FIRST_APPLICATION_TAG` belong to the
    /// engine and field names must be distinct.
    pub fn new(
        tag: u8,
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Self, RecordError> {
        let name = name.into();
        if tag < FIRST_APPLICATION_TAG {
            return Err(RecordError::InvalidSchema(format!(
                "{name}: tag 0x{tag:02x} is reserved"
            )));
        }
        if fields.len() > usize::from(u16::MAX) {
            return Err(RecordError::InvalidSchema(format!("{name}: too many fields")));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(RecordError::InvalidSchema(format!(
                    "{name}: duplicate field {}",
                    field.name
                )));
            }
        }
        Ok(Self { tag, name, fields })
    }

    #[must_use]
    pub const fn tag(&self) -> u8 {
        self.tag
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Ordinal of the named field.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Build a record of this type, checking the values against the fields.
    pub fn record(&self, values: Vec<FieldValue>) -> Result<Record, RecordError> {
        let record = Record::new(self.tag, values);
        self.validate(&record)?;
        Ok(record)
    }

    /// Check that `record` has this schema's tag, field count and kinds.
    pub fn validate(&self, record: &Record) -> Result<(), RecordError> {
        if record.tag != self.tag {
            return Err(RecordError::WrongTag {
                expected: self.tag,
                actual: record.tag,
            });
        }
        if record.values.len() != self.fields.len() {
            return Err(RecordError::FieldCount {
                expected: self.fields.len(),
                actual: record.values.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(&record.values) {
            if !value.matches(field.kind) {
                return Err(RecordError::FieldKindMismatch {
                    field: field.name.clone(),
                    expected: field.kind,
                });
            }
        }
        Ok(())
    }

    /// Decode and validate record bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record, RecordError> {
        let record = Record::decode(bytes)?;
        self.validate(&record)?;
        Ok(record)
    }
}

impl TypeDescriptor for RecordSchema {
    fn tag(&self) -> u8 {
        self.tag
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn child_references(&self, bytes: &[u8]) -> Result<Vec<Oid>, TraceError> {
        let record = self.decode(bytes).map_err(|e| TraceError::Malformed {
            tag: self.tag,
            reason: e.to_string(),
        })?;
        Ok(record
            .values
            .iter()
            .filter_map(|value| match value {
                FieldValue::Reference(oid) if *oid != NULL_OID => Some(*oid),
                _ => None,
            })
            .collect())
    }
}

/// Derives an index key from stored record bytes.
pub trait KeyExtractor {
    /// Shape of every key this extractor produces.
    fn shape(&self) -> KeyShape;

    fn extract(&self, bytes: &[u8]) -> Result<Key, RecordError>;
}

/// Extracts one field (scalar key) or several fields (compound key).
#[derive(Debug, Clone)]
pub struct FieldKey {
    schema: RecordSchema,
    ordinals: Vec<usize>,
    shape: KeyShape,
}

impl FieldKey {
    /// Select `fields` of `schema`, in key order.
    pub fn new(schema: &RecordSchema, fields: &[&str]) -> Result<Self, RecordError> {
        if fields.is_empty() || fields.len() > MAX_COMPOUND_ARITY {
            return Err(RecordError::InvalidSchema(format!(
                "{}: a key needs 1..={MAX_COMPOUND_ARITY} fields",
                schema.name
            )));
        }
        let mut ordinals = Vec::with_capacity(fields.len());
        let mut kinds = Vec::with_capacity(fields.len());
        for name in fields {
            let ordinal = schema
                .field_index(name)
                .ok_or_else(|| RecordError::UnknownField((*name).to_owned()))?;
            match schema.fields[ordinal].kind {
                FieldKind::Scalar(kind) => kinds.push(kind),
                FieldKind::Reference => return Err(RecordError::NotIndexable((*name).to_owned())),
            }
            ordinals.push(ordinal);
        }
        let shape = if kinds.len() == 1 {
            KeyShape::Scalar(kinds[0])
        } else {
            KeyShape::Compound(kinds)
        };
        Ok(Self {
            schema: schema.clone(),
            ordinals,
            shape,
        })
    }

    #[must_use]
    pub const fn schema(&self) -> &RecordSchema {
        &self.schema
    }
}

impl KeyExtractor for FieldKey {
    fn shape(&self) -> KeyShape {
        self.shape.clone()
    }

    fn extract(&self, bytes: &[u8]) -> Result<Key, RecordError> {
        let record = self.schema.decode(bytes)?;
        let mut parts = Vec::with_capacity(self.ordinals.len());
        for &ordinal in &self.ordinals {
            match &record.values[ordinal] {
                FieldValue::Scalar(s) => parts.push(s.clone()),
                FieldValue::Reference(_) => {
                    return Err(RecordError::NotIndexable(self.schema.fields[ordinal].name.clone()));
                }
            }
        }
        if parts.len() == 1 {
            Ok(Key::Scalar(parts.remove(0)))
        } else {
            Ok(Key::Compound(parts))
        }
    }
}

/// Errors that can occur while handling records.
#[derive(Debug)]
pub enum RecordError {
    /// The bytes are not a well-formed record.
    Codec(CodecError),
    /// The record belongs to another schema.
    WrongTag { expected: u8, actual: u8 },
    FieldCount { expected: usize, actual: usize },
    FieldKindMismatch { field: String, expected: FieldKind },
    UnknownField(String),
    /// Reference fields cannot be part of a key.
    NotIndexable(String),
    InvalidSchema(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "malformed record: {e}"),
            Self::WrongTag { expected, actual } => {
                write!(f, "record tag 0x{actual:02x}, expected 0x{expected:02x}")
            }
            Self::FieldCount { expected, actual } => {
                write!(f, "record has {actual} fields, expected {expected}")
            }
            Self::FieldKindMismatch { field, expected } => {
                write!(f, "field {field} must hold a {expected} value")
            }
            Self::UnknownField(name) => write!(f, "unknown field: {name}"),
            Self::NotIndexable(name) => write!(f, "field {name} cannot be indexed"),
            Self::InvalidSchema(msg) => write!(f, "invalid schema: {msg}"),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for RecordError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

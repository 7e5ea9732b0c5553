//! Index keys and their ordering.
//!
//! A [`Key`] is either a single [`Scalar`] or an ordered tuple of scalars
//! (a compound key). Every index declares a [`KeyShape`] and rejects keys of
//! any other shape, so comparisons between different kinds only exist to keep
//! `Ord` total.
//!
//! # Ordering
//!
//! - Integers and booleans compare numerically.
//! - Floats use IEEE-754 total order (`-0.0 < +0.0`, NaNs sort at the ends).
//! - GUIDs compare as unsigned big-endian byte strings.
//! - Timestamps are signed milliseconds; every negative value means "no value",
//!   all of them compare equal and sort below any real timestamp.
//! - Strings compare by their code point sequence.
//! - Compound keys compare component by component; the first difference wins.
//!
//! # Encoding
//!
//! - Scalar: `kind (1) | payload` (little-endian, strings length-prefixed)
//! - Key: `0x00 | scalar` or `0x01 | arity (1) | scalar*`
//! - Shape: `0x00 | kind` or `0x01 | arity (1) | kind*`

use std::cmp::Ordering;
use std::fmt;

use crate::storage::{ByteReader, ByteWriter, CodecError};

const FORM_SCALAR: u8 = 0x00;
const FORM_COMPOUND: u8 = 0x01;

/// Maximum number of components in a compound key.
pub const MAX_COMPOUND_ARITY: usize = u8::MAX as usize;

/// The semantic type of a scalar key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum KeyKind {
    Bool = 0x01,
    I8 = 0x02,
    U8 = 0x03,
    I16 = 0x04,
    U16 = 0x05,
    I32 = 0x06,
    U32 = 0x07,
    I64 = 0x08,
    U64 = 0x09,
    F32 = 0x0A,
    F64 = 0x0B,
    Guid = 0x0C,
    Timestamp = 0x0D,
    String = 0x0E,
}

impl TryFrom<u8> for KeyKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Bool),
            0x02 => Ok(Self::I8),
            0x03 => Ok(Self::U8),
            0x04 => Ok(Self::I16),
            0x05 => Ok(Self::U16),
            0x06 => Ok(Self::I32),
            0x07 => Ok(Self::U32),
            0x08 => Ok(Self::I64),
            0x09 => Ok(Self::U64),
            0x0A => Ok(Self::F32),
            0x0B => Ok(Self::F64),
            0x0C => Ok(Self::Guid),
            0x0D => Ok(Self::Timestamp),
            0x0E => Ok(Self::String),
            _ => Err(value),
        }
    }
}

impl KeyKind {
    /// Lower-case name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Guid => "guid",
            Self::Timestamp => "timestamp",
            Self::String => "string",
        }
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let tag = reader.read_u8()?;
        Self::try_from(tag).map_err(|tag| CodecError::InvalidTag {
            what: "key kind",
            tag,
        })
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single comparable key component.
#[derive(Debug, Clone)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// 128-bit identifier, ordered by its big-endian bytes.
    Guid([u8; 16]),
    /// Milliseconds since the Unix epoch; negative means "no value".
    Timestamp(i64),
    /// Ordered by UTF-16 code units.
    String(String),
}

impl Scalar {
    /// Build a timestamp component, mapping `None` to the "no value" marker.
    #[must_use]
    pub const fn timestamp(millis: Option<i64>) -> Self {
        match millis {
            Some(ms) if ms >= 0 => Self::Timestamp(ms),
            _ => Self::Timestamp(-1),
        }
    }

    /// The kind of this component.
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        match self {
            Self::Bool(_) => KeyKind::Bool,
            Self::I8(_) => KeyKind::I8,
            Self::U8(_) => KeyKind::U8,
            Self::I16(_) => KeyKind::I16,
            Self::U16(_) => KeyKind::U16,
            Self::I32(_) => KeyKind::I32,
            Self::U32(_) => KeyKind::U32,
            Self::I64(_) => KeyKind::I64,
            Self::U64(_) => KeyKind::U64,
            Self::F32(_) => KeyKind::F32,
            Self::F64(_) => KeyKind::F64,
            Self::Guid(_) => KeyKind::Guid,
            Self::Timestamp(_) => KeyKind::Timestamp,
            Self::String(_) => KeyKind::String,
        }
    }

    pub fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.kind() as u8);
        match self {
            Self::Bool(v) => writer.write_u8(u8::from(*v)),
            Self::I8(v) => writer.write_bytes(&v.to_le_bytes()),
            Self::U8(v) => writer.write_u8(*v),
            Self::I16(v) => writer.write_bytes(&v.to_le_bytes()),
            Self::U16(v) => writer.write_u16(*v),
            Self::I32(v) => writer.write_bytes(&v.to_le_bytes()),
            Self::U32(v) => writer.write_u32(*v),
            Self::I64(v) | Self::Timestamp(v) => writer.write_bytes(&v.to_le_bytes()),
            Self::U64(v) => writer.write_u64(*v),
            Self::F32(v) => writer.write_u32(v.to_bits()),
            Self::F64(v) => writer.write_u64(v.to_bits()),
            Self::Guid(v) => writer.write_bytes(v),
            Self::String(v) => writer.write_len_prefixed(v.as_bytes()),
        }
    }

    #[allow(clippy::cast_possible_wrap)] // reinterpreting stored two's complement bits
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let kind = KeyKind::decode(reader)?;
        Ok(match kind {
            KeyKind::Bool => Self::Bool(reader.read_u8()? != 0),
            KeyKind::I8 => Self::I8(reader.read_u8()? as i8),
            KeyKind::U8 => Self::U8(reader.read_u8()?),
            KeyKind::I16 => Self::I16(reader.read_u16()? as i16),
            KeyKind::U16 => Self::U16(reader.read_u16()?),
            KeyKind::I32 => Self::I32(reader.read_u32()? as i32),
            KeyKind::U32 => Self::U32(reader.read_u32()?),
            KeyKind::I64 => Self::I64(reader.read_u64()? as i64),
            KeyKind::U64 => Self::U64(reader.read_u64()?),
            KeyKind::F32 => Self::F32(f32::from_bits(reader.read_u32()?)),
            KeyKind::F64 => Self::F64(f64::from_bits(reader.read_u64()?)),
            KeyKind::Guid => Self::Guid(reader.read_guid()?),
            KeyKind::Timestamp => Self::Timestamp(reader.read_u64()? as i64),
            KeyKind::String => {
                let bytes = reader.read_len_prefixed()?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Self::String(s.to_owned())
            }
        })
    }

    /// Null timestamps collapse to a single rank below every real value.
    const fn timestamp_rank(millis: i64) -> i64 {
        if millis < 0 { -1 } else { millis }
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::I8(a), Self::I8(b)) => a.cmp(b),
            (Self::U8(a), Self::U8(b)) => a.cmp(b),
            (Self::I16(a), Self::I16(b)) => a.cmp(b),
            (Self::U16(a), Self::U16(b)) => a.cmp(b),
            (Self::I32(a), Self::I32(b)) => a.cmp(b),
            (Self::U32(a), Self::U32(b)) => a.cmp(b),
            (Self::I64(a), Self::I64(b)) => a.cmp(b),
            (Self::U64(a), Self::U64(b)) => a.cmp(b),
            (Self::F32(a), Self::F32(b)) => a.total_cmp(b),
            (Self::F64(a), Self::F64(b)) => a.total_cmp(b),
            (Self::Guid(a), Self::Guid(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => {
                Self::timestamp_rank(*a).cmp(&Self::timestamp_rank(*b))
            }
            (Self::String(a), Self::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Guid(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::Timestamp(v) if *v < 0 => f.write_str("<no timestamp>"),
            Self::Timestamp(v) => write!(f, "@{v}ms"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl From<$ty> for Key {
                fn from(value: $ty) -> Self {
                    Self::Scalar(Scalar::$variant(value))
                }
            }
        )*
    };
}

scalar_from!(
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    [u8; 16] => Guid,
    String => String,
);

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::from(value))
    }
}

impl From<Scalar> for Key {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

/// A comparable index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    Scalar(Scalar),
    /// Ordered tuple of components, compared lexicographically.
    Compound(Vec<Scalar>),
}

impl Key {
    /// Build a compound key from its components.
    #[must_use]
    pub fn compound(components: impl IntoIterator<Item = Scalar>) -> Self {
        Self::Compound(components.into_iter().collect())
    }

    /// The shape this key has.
    #[must_use]
    pub fn shape(&self) -> KeyShape {
        match self {
            Self::Scalar(s) => KeyShape::Scalar(s.kind()),
            Self::Compound(parts) => KeyShape::Compound(parts.iter().map(Scalar::kind).collect()),
        }
    }

    #[allow(clippy::cast_possible_truncation)] // arity is validated by the index shape
    pub fn encode(&self, writer: &mut ByteWriter) {
        match self {
            Self::Scalar(s) => {
                writer.write_u8(FORM_SCALAR);
                s.encode(writer);
            }
            Self::Compound(parts) => {
                writer.write_u8(FORM_COMPOUND);
                writer.write_u8(parts.len() as u8);
                for part in parts {
                    part.encode(writer);
                }
            }
        }
    }

    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        match reader.read_u8()? {
            FORM_SCALAR => Ok(Self::Scalar(Scalar::decode(reader)?)),
            FORM_COMPOUND => {
                let arity = reader.read_u8()? as usize;
                let mut parts = Vec::with_capacity(arity);
                for _ in 0..arity {
                    parts.push(Scalar::decode(reader)?);
                }
                Ok(Self::Compound(parts))
            }
            tag => Err(CodecError::InvalidTag {
                what: "key form",
                tag,
            }),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Compound(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// The declared key type of an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyShape {
    Scalar(KeyKind),
    Compound(Vec<KeyKind>),
}

impl KeyShape {
    /// Whether `key` has exactly this shape.
    #[must_use]
    pub fn accepts(&self, key: &Key) -> bool {
        match (self, key) {
            (Self::Scalar(kind), Key::Scalar(s)) => s.kind() == *kind,
            (Self::Compound(kinds), Key::Compound(parts)) => {
                kinds.len() == parts.len()
                    && kinds.iter().zip(parts).all(|(kind, part)| part.kind() == *kind)
            }
            _ => false,
        }
    }

    /// Whether this shape can be stored: compound shapes need 1..=255 parts.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Scalar(_) => true,
            Self::Compound(kinds) => !kinds.is_empty() && kinds.len() <= MAX_COMPOUND_ARITY,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // arity is checked by `is_valid`
    pub fn encode(&self, writer: &mut ByteWriter) {
        match self {
            Self::Scalar(kind) => {
                writer.write_u8(FORM_SCALAR);
                writer.write_u8(*kind as u8);
            }
            Self::Compound(kinds) => {
                writer.write_u8(FORM_COMPOUND);
                writer.write_u8(kinds.len() as u8);
                for kind in kinds {
                    writer.write_u8(*kind as u8);
                }
            }
        }
    }

    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        match reader.read_u8()? {
            FORM_SCALAR => Ok(Self::Scalar(KeyKind::decode(reader)?)),
            FORM_COMPOUND => {
                let arity = reader.read_u8()? as usize;
                let mut kinds = Vec::with_capacity(arity);
                for _ in 0..arity {
                    kinds.push(KeyKind::decode(reader)?);
                }
                Ok(Self::Compound(kinds))
            }
            tag => Err(CodecError::InvalidTag {
                what: "key shape",
                tag,
            }),
        }
    }
}

impl fmt::Display for KeyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => write!(f, "{kind}"),
            Self::Compound(kinds) => {
                f.write_str("(")?;
                for (i, kind) in kinds.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{kind}")?;
                }
                f.write_str(")")
            }
        }
    }
}

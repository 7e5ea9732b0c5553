//! Little-endian byte encoding helpers for stored objects.
//!
//! Every object the engine writes is a length-delimited blob assembled with
//! [`ByteWriter`] and parsed back with [`ByteReader`]. The reader never panics
//! on short or malformed input; it reports a [`CodecError`] instead so that
//! corrupt bytes surface as errors rather than crashes.

/// Append-only encoder for object bytes.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() is not const-stable
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create a writer with a pre-sized buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a `u32` length prefix followed by the bytes.
    #[allow(clippy::cast_possible_truncation)] // objects are far below 4 GiB
    pub fn write_len_prefixed(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Consume the writer and return the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over encoded object bytes.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Current read position.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Take the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CodecError::Truncated {
                offset: self.offset,
                needed: len,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_guid(&mut self) -> Result<[u8; 16], CodecError> {
        self.read_array()
    }

    /// Read a `u32` length prefix and the bytes it covers.
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Fail unless every byte has been consumed.
    pub const fn finish(&self) -> Result<(), CodecError> {
        if self.offset == self.bytes.len() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.bytes.len() - self.offset,
            })
        }
    }
}

/// Errors produced while decoding stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remained than the field needs.
    Truncated { offset: usize, needed: usize },
    /// A discriminant byte has no matching variant.
    InvalidTag { what: &'static str, tag: u8 },
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// The object has bytes past its last field.
    TrailingBytes { count: usize },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { offset, needed } => {
                write!(f, "truncated input: needed {needed} bytes at offset {offset}")
            }
            Self::InvalidTag { what, tag } => write!(f, "invalid {what} tag: 0x{tag:02x}"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::TrailingBytes { count } => write!(f, "{count} unexpected trailing bytes"),
        }
    }
}

impl std::error::Error for CodecError {}

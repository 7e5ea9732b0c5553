//! Pages of the file store.
//!
//! The file is an array of 8KB pages. Page 0 is the superblock, which has its
//! own layout. Every other page holds object table slots or object bytes and
//! starts with an 8-byte header:
//!
//! - byte 0: page kind
//! - bytes 1-3: zero
//! - bytes 4-7: CRC32 of the whole page, taken with these four bytes zeroed

/// Page size in bytes (8KB).
pub const PAGE_SIZE: usize = 8192;

/// Page size as u64 for offset calculations.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Bytes taken by the header of a table or data page.
pub const HEADER_SIZE: usize = 8;

/// Payload bytes in a table or data page.
pub const USABLE_SPACE: usize = PAGE_SIZE - HEADER_SIZE;

const CHECKSUM_OFFSET: usize = 4;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// What a page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Superblock = 0x01,
    /// Object table slots
    ObjectTable = 0x02,
    /// Object bytes
    ObjectData = 0x03,
}

impl TryFrom<u8> for PageType {
    type Error = PageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Superblock),
            0x02 => Ok(Self::ObjectTable),
            0x03 => Ok(Self::ObjectData),
            _ => Err(PageError::InvalidPageType(value)),
        }
    }
}

/// A page-sized, heap-allocated buffer.
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// A zeroed page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// A sealed page of `page_type` whose payload starts with `payload`.
    ///
    /// At most [`USABLE_SPACE`] bytes of `payload` are taken.
    #[must_use]
    pub fn with_payload(page_type: PageType, payload: &[u8]) -> Self {
        let mut page = Self::new();
        page.data[0] = page_type as u8;
        let len = payload.len().min(USABLE_SPACE);
        page.write_bytes(HEADER_SIZE, &payload[..len]);
        let checksum = page.checksum();
        page.write_u32(CHECKSUM_OFFSET, checksum);
        page
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    /// The bytes after the header.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }

    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(offset, 4));
        u32::from_le_bytes(buf)
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(offset, 8));
        u64::from_le_bytes(buf)
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[CHECKSUM_OFFSET + 4..]);
        hasher.finalize()
    }

    /// Check that this is an intact page of the `expected` kind.
    pub fn verify(&self, expected: PageType) -> Result<(), PageError> {
        let actual_type = PageType::try_from(self.data[0])?;
        if actual_type != expected {
            return Err(PageError::UnexpectedPageType {
                expected,
                actual: actual_type,
            });
        }
        let stored = self.read_u32(CHECKSUM_OFFSET);
        let computed = self.checksum();
        if stored != computed {
            return Err(PageError::ChecksumMismatch { stored, computed });
        }
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("header", &&self.data[..HEADER_SIZE])
            .finish_non_exhaustive()
    }
}

/// A page failed verification.
#[derive(Debug, PartialEq, Eq)]
pub enum PageError {
    InvalidPageType(u8),
    UnexpectedPageType { expected: PageType, actual: PageType },
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::UnexpectedPageType { expected, actual } => {
                write!(f, "expected {expected:?} page, found {actual:?}")
            }
            Self::ChecksumMismatch { stored, computed } => {
                write!(f, "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")
            }
        }
    }
}

impl std::error::Error for PageError {}

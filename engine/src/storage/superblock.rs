//! Superblock structure and serialization.
//!
//! The superblock occupies page 0 and records where the current object table
//! lives. Rewriting it is the commit point of a file store transaction.

// PAGE_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId};
use crate::types::{NULL_OID, Oid};

/// Magic number identifying an object store file: "OIDSTORE"
pub const MAGIC: [u8; 8] = *b"OIDSTORE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Page size as u32 for storage in superblock.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const TOTAL_PAGE_COUNT: usize = 16;
    pub const ROOT_OID: usize = 24;
    pub const TABLE_FIRST_PAGE: usize = 32;
    pub const TABLE_PAGE_COUNT: usize = 40;
    pub const OID_LIMIT: usize = 48;
    pub const CHECKSUM: usize = 56;
    // 60-8191: reserved
}

/// Metadata about the store file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes (should always be `PAGE_SIZE`).
    pub page_size: u32,
    /// Total number of pages in the file.
    pub total_page_count: u64,
    /// Application root object.
    pub root_oid: Oid,
    /// First page of the object table (0 when the table is empty).
    pub table_first_page: PageId,
    /// Number of pages in the object table run.
    pub table_page_count: u64,
    /// Exclusive upper bound of issued OIDs.
    pub oid_limit: Oid,
}

impl Superblock {
    /// Create a new superblock for a fresh store of `total_page_count` pages.
    #[must_use]
    pub const fn new(total_page_count: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            total_page_count,
            root_oid: NULL_OID,
            table_first_page: 0,
            table_page_count: 0,
            oid_limit: 1,
        }
    }

    /// Serialize the superblock to a page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        page.write_u64(offsets::ROOT_OID, self.root_oid);
        page.write_u64(offsets::TABLE_FIRST_PAGE, self.table_first_page);
        page.write_u64(offsets::TABLE_PAGE_COUNT, self.table_page_count);
        page.write_u64(offsets::OID_LIMIT, self.oid_limit);
        let checksum = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        page.write_u32(offsets::CHECKSUM, checksum);

        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let stored = page.read_u32(offsets::CHECKSUM);
        let actual = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        if stored != actual {
            return Err(SuperblockError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        Ok(Self {
            format_version,
            page_size,
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            root_oid: page.read_u64(offsets::ROOT_OID),
            table_first_page: page.read_u64(offsets::TABLE_FIRST_PAGE),
            table_page_count: page.read_u64(offsets::TABLE_PAGE_COUNT),
            oid_limit: page.read_u64(offsets::OID_LIMIT),
        })
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid page size.
    InvalidPageSize(u32),
    /// Stored checksum does not match the superblock bytes.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "superblock checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for SuperblockError {}

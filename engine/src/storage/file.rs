//! Single-file durable object store.
//!
//! # Layout
//!
//! - Page 0: [`Superblock`], the commit point.
//! - Object table: one contiguous page run of 16-byte slots indexed by OID
//!   (`first_page u64 | len u32 | flags u32`).
//! - Object data: each object's bytes fill a contiguous page run.
//!
//! # Commit
//!
//! Changes are buffered in memory. `commit` writes changed objects and a new
//! object table to free pages, syncs, rewrites the superblock, syncs again, and
//! only then releases the pages the previous commit used. A crash at any point
//! before the superblock write leaves the previous commit intact.

// Page ids and OIDs index in-memory vectors; on 64-bit targets they fit usize.
#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::storage::allocator::{Extent, PageAllocator};
use crate::storage::page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId, PageType, USABLE_SPACE};
use crate::storage::store::{ObjectStore, StoreError};
use crate::storage::superblock::Superblock;
use crate::types::{NULL_OID, Oid};

/// Pages in a freshly created file.
const INITIAL_PAGES: u64 = 16;

const SLOT_SIZE: usize = 16;
const SLOTS_PER_PAGE: usize = USABLE_SPACE / SLOT_SIZE;

const SLOT_ALLOCATED: u32 = 0b01;
const SLOT_WRITTEN: u32 = 0b10;

/// Object table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Slot {
    first_page: PageId,
    len: u32,
    flags: u32,
}

impl Slot {
    const fn allocated() -> Self {
        Self {
            first_page: 0,
            len: 0,
            flags: SLOT_ALLOCATED,
        }
    }

    const fn is_allocated(self) -> bool {
        self.flags & SLOT_ALLOCATED != 0
    }

    const fn is_written(self) -> bool {
        self.flags & SLOT_WRITTEN != 0
    }

    fn extent(self) -> Extent {
        if self.is_written() {
            Extent::new(self.first_page, pages_for(self.len as usize))
        } else {
            Extent::new(0, 0)
        }
    }

    fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.first_page.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut first_page = [0u8; 8];
        first_page.copy_from_slice(&bytes[0..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[8..12]);
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&bytes[12..16]);
        Self {
            first_page: u64::from_le_bytes(first_page),
            len: u32::from_le_bytes(len),
            flags: u32::from_le_bytes(flags),
        }
    }
}

/// Number of data pages an object of `len` bytes occupies.
const fn pages_for(len: usize) -> u64 {
    len.div_ceil(USABLE_SPACE) as u64
}

/// An uncommitted change to one OID.
#[derive(Debug)]
enum Staged {
    /// Allocated in this transaction, no bytes yet.
    Allocated,
    Written(Vec<u8>),
    Freed,
}

/// Durable [`ObjectStore`] backed by one file.
pub struct FileStore {
    file: File,
    path: PathBuf,
    /// State of the last commit.
    superblock: Superblock,
    slots: Vec<Slot>,
    allocator: PageAllocator,
    staged: BTreeMap<Oid, Staged>,
    free_oids: Vec<Oid>,
    oid_limit: Oid,
    root: Oid,
}

impl FileStore {
    /// Create a new store file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let superblock = Superblock::new(INITIAL_PAGES);
        file.set_len(INITIAL_PAGES * PAGE_SIZE_U64)?;
        file.write_all(superblock.to_page().as_bytes())?;
        file.sync_all()?;

        tracing::info!("created object store at {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            superblock,
            slots: Vec::new(),
            allocator: PageAllocator::new(INITIAL_PAGES),
            staged: BTreeMap::new(),
            free_oids: Vec::new(),
            oid_limit: superblock.oid_limit,
            root: superblock.root_oid,
        })
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut page = Page::new();
        read_at(&file, page.as_bytes_mut(), 0)?;
        let superblock = Superblock::from_page(&page)?;

        let file_pages = file.metadata()?.len() / PAGE_SIZE_U64;
        if file_pages < superblock.total_page_count {
            return Err(StoreError::Corruption(format!(
                "file has {file_pages} pages, superblock claims {}",
                superblock.total_page_count
            )));
        }

        let slots = read_table(&file, &superblock)?;
        let table = Extent::new(superblock.table_first_page, superblock.table_page_count);
        let extents = std::iter::once(table).chain(slots.iter().map(|slot| slot.extent()));
        let allocator = PageAllocator::from_extents(file_pages, extents)
            .map_err(|e| StoreError::Corruption(e.to_string()))?;

        tracing::info!(
            "opened object store at {} ({} pages, oid limit {})",
            path.display(),
            file_pages,
            superblock.oid_limit
        );

        let mut store = Self {
            file,
            path: path.to_path_buf(),
            superblock,
            slots,
            allocator,
            staged: BTreeMap::new(),
            free_oids: Vec::new(),
            oid_limit: superblock.oid_limit,
            root: superblock.root_oid,
        };
        store.rebuild_free_oids();
        Ok(store)
    }

    /// Open the store at `path`, creating it (and its parent directory) if missing.
    pub fn open_or_create(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            return Self::open(path);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::create(path)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pages in the file, including free ones.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.allocator.total_pages()
    }

    /// Pages not used by the last commit.
    #[must_use]
    pub const fn free_pages(&self) -> u64 {
        self.allocator.free_count()
    }

    fn committed_slot(&self, oid: Oid) -> Slot {
        self.slots.get(oid as usize).copied().unwrap_or_default()
    }

    /// Free OIDs are handed out lowest first.
    fn rebuild_free_oids(&mut self) {
        self.free_oids = (1..self.oid_limit)
            .rev()
            .filter(|&oid| !self.committed_slot(oid).is_allocated())
            .collect();
    }

    fn read_page(&self, page_id: PageId, page_type: PageType) -> Result<Page, StoreError> {
        if page_id == 0 || page_id >= self.allocator.total_pages() {
            return Err(StoreError::Corruption(format!(
                "page {page_id} out of bounds (total pages: {})",
                self.allocator.total_pages()
            )));
        }
        let mut page = Page::new();
        read_at(&self.file, page.as_bytes_mut(), page_id * PAGE_SIZE_U64)?;
        page.verify(page_type)
            .map_err(|e| StoreError::Corruption(format!("page {page_id}: {e}")))?;
        Ok(page)
    }

    fn read_object(&self, slot: Slot) -> Result<Vec<u8>, StoreError> {
        let len = slot.len as usize;
        let mut out = Vec::with_capacity(len);
        let extent = slot.extent();
        for page_id in extent.first_page..extent.first_page + extent.page_count {
            let page = self.read_page(page_id, PageType::ObjectData)?;
            let take = (len - out.len()).min(USABLE_SPACE);
            out.extend_from_slice(&page.payload()[..take]);
        }
        Ok(out)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))?;
        self.file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// Find a free run of `count` pages, doubling the file until one exists.
    fn allocate_run(&mut self, count: u64) -> Result<Extent, StoreError> {
        loop {
            if let Some(extent) = self.allocator.allocate_contiguous(count) {
                return Ok(extent);
            }
            let total = self.allocator.total_pages();
            let new_total = (total * 2).max(total + count);
            self.file.set_len(new_total * PAGE_SIZE_U64)?;
            self.allocator.expand(new_total);
            tracing::debug!("grew store file from {} to {} pages", total, new_total);
        }
    }

    /// Write `chunks` to a fresh page run, one chunk per page.
    fn write_run<'a>(
        &mut self,
        page_type: PageType,
        page_count: u64,
        chunks: impl Iterator<Item = &'a [u8]>,
    ) -> Result<Extent, StoreError> {
        let extent = self.allocate_run(page_count)?;
        for (i, chunk) in chunks.enumerate() {
            let page = Page::with_payload(page_type, chunk);
            self.write_page(extent.first_page + i as u64, &page)?;
        }
        Ok(extent)
    }

    /// Everything up to the superblock write. On error the caller restores
    /// the allocator; nothing committed has been touched.
    fn write_commit(&mut self, staged: &BTreeMap<Oid, Staged>) -> Result<(), StoreError> {
        let mut slots = self.slots.clone();
        slots.resize(self.oid_limit as usize, Slot::default());
        let mut released = Vec::new();
        let mut written = 0usize;

        for (&oid, change) in staged {
            let old = slots.get(oid as usize).copied().ok_or_else(|| {
                StoreError::Corruption(format!("staged oid {oid} beyond limit {}", self.oid_limit))
            })?;
            if old.is_written() {
                released.push(old.extent());
            }
            let slot = match change {
                Staged::Allocated => Slot::allocated(),
                Staged::Freed => Slot::default(),
                Staged::Written(bytes) => {
                    let len = u32::try_from(bytes.len()).map_err(|_| StoreError::ObjectTooLarge {
                        oid,
                        len: bytes.len(),
                    })?;
                    let extent = self.write_run(
                        PageType::ObjectData,
                        pages_for(bytes.len()),
                        bytes.chunks(USABLE_SPACE),
                    )?;
                    written += 1;
                    Slot {
                        first_page: extent.first_page,
                        len,
                        flags: SLOT_ALLOCATED | SLOT_WRITTEN,
                    }
                }
            };
            slots[oid as usize] = slot;
        }

        let mut table_bytes = Vec::with_capacity(slots.len() * SLOT_SIZE);
        for slot in &slots {
            slot.encode(&mut table_bytes);
        }
        let table_pages = slots.len().div_ceil(SLOTS_PER_PAGE) as u64;
        let table = self.write_run(
            PageType::ObjectTable,
            table_pages,
            table_bytes.chunks(SLOTS_PER_PAGE * SLOT_SIZE),
        )?;

        self.file.sync_all()?;

        let superblock = Superblock {
            total_page_count: self.allocator.total_pages(),
            root_oid: self.root,
            table_first_page: table.first_page,
            table_page_count: table.page_count,
            oid_limit: self.oid_limit,
            ..self.superblock
        };
        self.write_page(0, &superblock.to_page())?;
        self.file.sync_all()?;

        // Committed: the previous table and replaced objects are garbage now.
        released.push(Extent::new(
            self.superblock.table_first_page,
            self.superblock.table_page_count,
        ));
        for extent in released {
            self.allocator.free(extent);
        }

        tracing::debug!(
            "file store commit: {} objects changed, {} written, table {} pages, file {} pages",
            staged.len(),
            written,
            table.page_count,
            superblock.total_page_count
        );

        self.superblock = superblock;
        self.slots = slots;
        Ok(())
    }

    fn committed_extents(&self) -> Vec<Extent> {
        let table = Extent::new(
            self.superblock.table_first_page,
            self.superblock.table_page_count,
        );
        std::iter::once(table)
            .chain(self.slots.iter().map(|slot| slot.extent()))
            .collect()
    }
}

impl ObjectStore for FileStore {
    fn allocate(&mut self) -> Result<Oid, StoreError> {
        let oid = match self.free_oids.pop() {
            Some(oid) => oid,
            None => {
                let oid = self.oid_limit;
                self.oid_limit += 1;
                oid
            }
        };
        self.staged.insert(oid, Staged::Allocated);
        Ok(oid)
    }

    fn get(&self, oid: Oid) -> Result<Vec<u8>, StoreError> {
        if oid == NULL_OID {
            return Err(StoreError::NullOid);
        }
        match self.staged.get(&oid) {
            Some(Staged::Written(bytes)) => return Ok(bytes.clone()),
            Some(Staged::Allocated | Staged::Freed) => return Err(StoreError::ObjectNotFound(oid)),
            None => {}
        }
        let slot = self.committed_slot(oid);
        if !slot.is_written() {
            return Err(StoreError::ObjectNotFound(oid));
        }
        self.read_object(slot)
    }

    fn put(&mut self, oid: Oid, bytes: Vec<u8>) -> Result<(), StoreError> {
        if oid == NULL_OID {
            return Err(StoreError::NullOid);
        }
        if !self.is_allocated(oid) {
            return Err(StoreError::ObjectNotFound(oid));
        }
        if u32::try_from(bytes.len()).is_err() {
            return Err(StoreError::ObjectTooLarge {
                oid,
                len: bytes.len(),
            });
        }
        self.staged.insert(oid, Staged::Written(bytes));
        Ok(())
    }

    fn free(&mut self, oid: Oid) -> Result<(), StoreError> {
        if oid == NULL_OID {
            return Err(StoreError::NullOid);
        }
        if !self.is_allocated(oid) {
            return Err(StoreError::ObjectNotFound(oid));
        }
        self.staged.insert(oid, Staged::Freed);
        self.free_oids.push(oid);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.staged.is_empty()
            && self.root == self.superblock.root_oid
            && self.oid_limit == self.superblock.oid_limit
        {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.staged);
        if let Err(e) = self.write_commit(&staged) {
            self.staged = staged;
            self.allocator =
                PageAllocator::from_extents(self.allocator.total_pages(), self.committed_extents())
                    .map_err(|e| StoreError::Corruption(e.to_string()))?;
            return Err(e);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        tracing::debug!("file store rollback: {} staged objects discarded", self.staged.len());
        self.staged.clear();
        self.oid_limit = self.superblock.oid_limit;
        self.root = self.superblock.root_oid;
        self.rebuild_free_oids();
        Ok(())
    }

    fn root(&self) -> Oid {
        self.root
    }

    fn set_root(&mut self, oid: Oid) {
        self.root = oid;
    }

    fn oid_limit(&self) -> Oid {
        self.oid_limit
    }

    fn is_allocated(&self, oid: Oid) -> bool {
        if oid == NULL_OID || oid >= self.oid_limit {
            return false;
        }
        match self.staged.get(&oid) {
            Some(Staged::Allocated | Staged::Written(_)) => true,
            Some(Staged::Freed) => false,
            None => self.committed_slot(oid).is_allocated(),
        }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("superblock", &self.superblock)
            .field("staged", &self.staged.len())
            .finish_non_exhaustive()
    }
}

/// Read the object table the superblock points at.
fn read_table(file: &File, superblock: &Superblock) -> Result<Vec<Slot>, StoreError> {
    let count = superblock.oid_limit as usize;
    let mut slots = Vec::with_capacity(count);
    let mut page = Page::new();
    for i in 0..superblock.table_page_count {
        let page_id = superblock.table_first_page + i;
        read_at(file, page.as_bytes_mut(), page_id * PAGE_SIZE_U64)?;
        page.verify(PageType::ObjectTable)
            .map_err(|e| StoreError::Corruption(format!("object table page {page_id}: {e}")))?;
        for raw in page.payload()[..SLOTS_PER_PAGE * SLOT_SIZE].chunks_exact(SLOT_SIZE) {
            if slots.len() == count {
                break;
            }
            slots.push(Slot::decode(raw));
        }
    }
    if slots.len() < count && superblock.table_page_count > 0 {
        return Err(StoreError::Corruption(format!(
            "object table holds {} slots, expected {count}",
            slots.len()
        )));
    }
    Ok(slots)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8; PAGE_SIZE], offset: u64) -> std::io::Result<()> {
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_at(mut file: &File, buf: &mut [u8; PAGE_SIZE], offset: u64) -> std::io::Result<()> {
    use std::io::Read;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

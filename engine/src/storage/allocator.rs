//! Page allocator using a bitmap to track free/used pages.
//!
//! The bitmap is not persisted: it is rebuilt at open from the extents the
//! object table and superblock reference. Each bit represents one page:
//! clear = free, set = used. Page 0 (superblock) is always used.

use crate::storage::bitmap::Bitmap;
use crate::storage::page::PageId;

/// A run of contiguous pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub first_page: PageId,
    pub page_count: u64,
}

impl Extent {
    #[must_use]
    pub const fn new(first_page: PageId, page_count: u64) -> Self {
        Self {
            first_page,
            page_count,
        }
    }
}

/// Tracks which pages of the store file are in use.
#[derive(Debug)]
pub struct PageAllocator {
    bitmap: Bitmap,
    free_count: u64,
    /// Hint for next free page search (optimization).
    next_search_hint: u64,
}

impl PageAllocator {
    /// Create an allocator for `total_pages` pages with only the superblock used.
    #[must_use]
    pub fn new(total_pages: u64) -> Self {
        let mut bitmap = Bitmap::new(total_pages);
        bitmap.set(0);
        Self {
            bitmap,
            free_count: total_pages.saturating_sub(1),
            next_search_hint: 1,
        }
    }

    /// Rebuild an allocator from the extents that are in use.
    ///
    /// Fails if two extents overlap or one lies past the end of the file.
    pub fn from_extents(
        total_pages: u64,
        extents: impl IntoIterator<Item = Extent>,
    ) -> Result<Self, AllocatorError> {
        let mut alloc = Self::new(total_pages);
        for extent in extents {
            alloc.mark_used(extent)?;
        }
        alloc.next_search_hint = 1;
        Ok(alloc)
    }

    /// Mark an extent as used.
    pub fn mark_used(&mut self, extent: Extent) -> Result<(), AllocatorError> {
        let end = extent.first_page.saturating_add(extent.page_count);
        if end > self.bitmap.len() {
            return Err(AllocatorError::OutOfBounds {
                extent,
                total_pages: self.bitmap.len(),
            });
        }
        for page in extent.first_page..end {
            if !self.bitmap.set(page) {
                return Err(AllocatorError::Overlap { page });
            }
            self.free_count -= 1;
        }
        Ok(())
    }

    /// Allocate multiple contiguous pages.
    ///
    /// Returns `None` if no contiguous run of the requested size is available.
    pub fn allocate_contiguous(&mut self, count: u64) -> Option<Extent> {
        if count == 0 {
            return Some(Extent::new(0, 0));
        }
        if count > self.free_count {
            return None;
        }

        let start = self
            .find_run(self.next_search_hint, self.bitmap.len(), count)
            .or_else(|| self.find_run(1, self.bitmap.len(), count))?;
        for page in start..start + count {
            self.bitmap.set(page);
        }
        self.free_count -= count;
        self.next_search_hint = start + count;
        Some(Extent::new(start, count))
    }

    fn find_run(&self, from: u64, to: u64, count: u64) -> Option<PageId> {
        let mut run_start = from;
        let mut run_length = 0u64;
        for page in from..to {
            if self.bitmap.get(page) {
                run_start = page + 1;
                run_length = 0;
            } else {
                run_length += 1;
                if run_length >= count {
                    return Some(run_start);
                }
            }
        }
        None
    }

    /// Free an extent. Pages that are already free are ignored.
    pub fn free(&mut self, extent: Extent) {
        for page in extent.first_page..extent.first_page.saturating_add(extent.page_count) {
            if page == 0 {
                continue;
            }
            if self.bitmap.clear(page) {
                self.free_count += 1;
                if page < self.next_search_hint {
                    self.next_search_hint = page;
                }
            }
        }
    }

    #[cfg(test)]
    fn is_allocated(&self, page_id: PageId) -> bool {
        self.bitmap.get(page_id)
    }

    /// Get the number of free pages.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Get the total number of pages being tracked.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.bitmap.len()
    }

    /// Expand the allocator to track more pages.
    ///
    /// The new pages are marked as free.
    pub fn expand(&mut self, new_total_pages: u64) {
        let old = self.bitmap.len();
        if new_total_pages <= old {
            return;
        }
        self.bitmap.grow(new_total_pages);
        self.free_count += new_total_pages - old;
    }
}

/// Errors raised while rebuilding allocation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Two extents claim the same page.
    Overlap { page: PageId },
    /// An extent reaches past the end of the file.
    OutOfBounds { extent: Extent, total_pages: u64 },
}

impl std::fmt::Display for AllocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overlap { page } => write!(f, "page {page} is claimed twice"),
            Self::OutOfBounds {
                extent,
                total_pages,
            } => write!(
                f,
                "extent {}+{} exceeds {total_pages} pages",
                extent.first_page, extent.page_count
            ),
        }
    }
}

impl std::error::Error for AllocatorError {}

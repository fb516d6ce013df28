use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{DiskError, DiskResult};
use crate::page::{INVALID_PAGE_ID, PAGE_SIZE, PageId};

/// Page store consumed by the buffer pool.
///
/// The pool calls these four operations while holding its own latch; they are
/// synchronous and must leave the store usable after an error.
pub trait DiskStore: Send {
    /// Read the page into `buffer` (exactly `PAGE_SIZE` bytes)
    fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> DiskResult<()>;

    /// Write `buffer` (exactly `PAGE_SIZE` bytes) as the page's content
    fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> DiskResult<()>;

    /// Hand out an unused page id
    fn allocate_page(&mut self) -> DiskResult<PageId>;

    /// Reclaim a page id for later reuse
    fn deallocate_page(&mut self, page_id: PageId) -> DiskResult<()>;
}

/// Single-file page store
pub struct FileDiskManager {
    file: File,
    path: PathBuf,
    /// Next never-handed-out page id
    next_page_id: PageId,
    /// Deallocated ids, reused before extending the file.
    /// Not persisted across reopen.
    free_pages: Vec<PageId>,
}

impl FileDiskManager {
    /// Open the page file at `path`, creating it if it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> DiskResult<Self> {
        let path = path.as_ref();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = file_size.div_ceil(PAGE_SIZE as u64);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            next_page_id,
            free_pages: Vec::new(),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages the file spans (allocated or not yet written)
    pub fn page_count(&self) -> u64 {
        self.next_page_id
    }

    /// Sync the backing file to disk (flush all OS buffers)
    pub fn sync(&mut self) -> DiskResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn check_buffer(buffer_len: usize) -> DiskResult<()> {
        if buffer_len != PAGE_SIZE {
            return Err(DiskError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer_len,
            });
        }
        Ok(())
    }
}

impl DiskStore for FileDiskManager {
    fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> DiskResult<()> {
        Self::check_buffer(buffer.len())?;
        if page_id == INVALID_PAGE_ID {
            return Err(DiskError::InvalidPageId(page_id));
        }

        let offset = page_id * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let bytes_read = self.file.read(buffer)?;

        // If we read less than PAGE_SIZE, fill the rest with zeros
        if bytes_read < PAGE_SIZE {
            buffer[bytes_read..].fill(0);
        }

        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> DiskResult<()> {
        Self::check_buffer(buffer.len())?;
        if page_id == INVALID_PAGE_ID {
            return Err(DiskError::InvalidPageId(page_id));
        }

        let offset = page_id * PAGE_SIZE as u64;
        let required_size = offset + PAGE_SIZE as u64;

        // Extend file if necessary to ensure we can write at this offset
        let current_size = self.file.metadata()?.len();
        if current_size < required_size {
            self.file.set_len(required_size)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buffer)?;
        // Note: Don't sync on every write - let the OS buffer and batch writes

        Ok(())
    }

    fn allocate_page(&mut self) -> DiskResult<PageId> {
        if let Some(page_id) = self.free_pages.pop() {
            return Ok(page_id);
        }
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> DiskResult<()> {
        if page_id >= self.next_page_id {
            return Err(DiskError::InvalidPageId(page_id));
        }
        debug_assert!(
            !self.free_pages.contains(&page_id),
            "page {page_id} deallocated twice"
        );
        self.free_pages.push(page_id);
        Ok(())
    }
}

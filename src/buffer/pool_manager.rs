use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use super::error::BufferResult;
use super::lru_replacer::{LruReplacer, Replacer};
use crate::disk::DiskStore;
use crate::hash::{DEFAULT_BUCKET_CAPACITY, ExtendibleHashTable};
use crate::page::{FrameId, INVALID_PAGE_ID, Page, PageId};

/// Mediates every access to fixed-size pages between upper storage
/// structures and the disk store.
///
/// The pool owns a fixed arena of frames, a page table mapping resident page
/// ids to frame handles, a free list of frames that currently hold no page,
/// and a replacer tracking which resident frames are evictable. Fetching a
/// page pins its frame; a pinned frame is never chosen as an eviction victim.
/// Callers unpin when done, and a frame whose pin count reaches zero becomes
/// an eviction candidate again.
///
/// Every operation serializes on a single pool latch held for the whole
/// call, disk I/O included: a coarse critical section chosen for correctness
/// over throughput, so concurrent operations queue behind in-flight I/O. The
/// page table and replacer keep their own internal locks and never call back
/// into the pool, so no lock-ordering cycle exists.
///
/// Nothing is flushed implicitly at teardown; callers that need persistence
/// must flush dirty pages explicitly.
pub struct BufferPoolManager<D: DiskStore> {
    /// Frame arena, allocated once; `FrameId` handles index into it
    frames: Vec<Arc<Page>>,
    /// page id -> frame handle for resident pages
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Unpinned resident frames eligible for eviction
    replacer: Box<dyn Replacer<FrameId>>,
    /// Free list and disk store, under the pool latch
    state: Mutex<PoolState<D>>,
}

struct PoolState<D> {
    /// Frames holding no page, always preferred over eviction
    free_list: VecDeque<FrameId>,
    disk: D,
}

impl<D: DiskStore> BufferPoolManager<D> {
    /// Create a pool of `pool_size` frames backed by `disk`, evicting with
    /// an LRU policy
    pub fn new(pool_size: usize, disk: D) -> Self {
        Self::with_replacer(pool_size, disk, Box::new(LruReplacer::new()))
    }

    /// Create a pool with a caller-supplied eviction policy
    pub fn with_replacer(
        pool_size: usize,
        disk: D,
        replacer: Box<dyn Replacer<FrameId>>,
    ) -> Self {
        assert!(pool_size > 0, "buffer pool must hold at least one frame");

        let frames = (0..pool_size).map(|id| Arc::new(Page::new(id))).collect();

        Self {
            frames,
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_CAPACITY),
            replacer,
            state: Mutex::new(PoolState {
                free_list: (0..pool_size).collect(),
                disk,
            }),
        }
    }

    /// Fetch the page with `page_id`, pinning its frame.
    ///
    /// A resident page is returned without disk I/O. On a miss the pool
    /// claims a victim frame (free list first, then the replacer), writes
    /// the victim back if dirty, and loads the requested bytes. Returns
    /// `Ok(None)` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<Option<Arc<Page>>> {
        let mut state = self.state.lock().unwrap();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let page = Arc::clone(&self.frames[frame_id]);
            page.incr_pin();
            self.replacer.erase(&frame_id);
            return Ok(Some(page));
        }

        let Some(frame_id) = self.take_victim(&mut state)? else {
            trace!(page_id, "fetch miss with every frame pinned");
            return Ok(None);
        };
        let page = Arc::clone(&self.frames[frame_id]);

        {
            let mut data = page.write();
            if let Err(e) = state.disk.read_page(page_id, &mut data[..]) {
                drop(data);
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        self.page_table.insert(page_id, frame_id);
        page.set_id(page_id);
        page.set_dirty(false);
        page.set_pin_count(1);
        trace!(page_id, frame_id, "loaded page");
        Ok(Some(page))
    }

    /// Drop one pin on the page, marking it dirty when `is_dirty` is set.
    ///
    /// Returns false when the page is not resident or its pin count is
    /// already zero (in which case nothing is mutated). A true dirty flag is
    /// never cleared here: unpinning clean does not undo a dirty mark left
    /// by another holder. A frame whose pin count reaches zero becomes an
    /// eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _state = self.state.lock().unwrap();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let page = &self.frames[frame_id];

        if page.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            page.set_dirty(true);
        }
        if page.decr_pin() == 0 {
            self.replacer.insert(frame_id);
        }
        true
    }

    /// Write the page back to disk if dirty, clearing its dirty flag.
    ///
    /// Returns false when the page is not resident (or `page_id` is the
    /// reserved invalid id); a clean resident page is a true no-op.
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<bool> {
        let mut state = self.state.lock().unwrap();

        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let page = &self.frames[frame_id];

        if page.is_dirty() {
            {
                let data = page.read();
                state.disk.write_page(page_id, &data[..])?;
            }
            page.set_dirty(false);
            debug!(page_id, "flushed page");
        }
        Ok(true)
    }

    /// Write every dirty resident page back to disk
    pub fn flush_all_pages(&self) -> BufferResult<()> {
        let mut state = self.state.lock().unwrap();

        for page in &self.frames {
            let page_id = page.id();
            if page_id != INVALID_PAGE_ID && page.is_dirty() {
                {
                    let data = page.read();
                    state.disk.write_page(page_id, &data[..])?;
                }
                page.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Delete the page, returning its frame to the free list.
    ///
    /// A resident page with active pins cannot be deleted and returns false.
    /// Whether or not the page was resident, the disk store is told to
    /// reclaim the id.
    pub fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        let mut state = self.state.lock().unwrap();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let page = &self.frames[frame_id];
            if page.pin_count() > 0 {
                return Ok(false);
            }

            self.replacer.erase(&frame_id);
            self.page_table.remove(&page_id);
            page.set_dirty(false);
            page.reset();
            page.set_id(INVALID_PAGE_ID);
            state.free_list.push_back(frame_id);
            debug!(page_id, frame_id, "deleted page");
        }

        state.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame.
    ///
    /// Returns `Ok(None)` when every frame is pinned; no page id is
    /// allocated in that case.
    pub fn new_page(&self) -> BufferResult<Option<Arc<Page>>> {
        let mut state = self.state.lock().unwrap();

        let Some(frame_id) = self.take_victim(&mut state)? else {
            trace!("new page with every frame pinned");
            return Ok(None);
        };
        let page = Arc::clone(&self.frames[frame_id]);

        let page_id = match state.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        page.reset();
        self.page_table.insert(page_id, frame_id);
        page.set_id(page_id);
        page.set_dirty(false);
        page.set_pin_count(1);
        debug!(page_id, frame_id, "new page");
        Ok(Some(page))
    }

    /// Number of frames in the pool
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames currently holding no page
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().unwrap().free_list.len()
    }

    /// Number of unpinned resident frames eligible for eviction
    pub fn evictable_count(&self) -> usize {
        self.replacer.len()
    }

    /// Claim a frame for reuse: free list first, then the replacer.
    ///
    /// A replacer victim is written back if dirty and unmapped from the page
    /// table. The returned frame is always unbound (invalid id, pin count
    /// zero, clean); `None` means every frame is pinned. On a write-back
    /// failure the victim stays resident and re-enters the replacer.
    fn take_victim(&self, state: &mut PoolState<D>) -> BufferResult<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            let page = &self.frames[frame_id];
            debug_assert_eq!(page.id(), INVALID_PAGE_ID, "free frame still bound");
            debug_assert_eq!(page.pin_count(), 0, "free frame still pinned");
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.replacer.victim() else {
            return Ok(None);
        };
        let page = &self.frames[frame_id];
        debug_assert_eq!(page.pin_count(), 0, "eviction victim still pinned");

        let old_page_id = page.id();
        if page.is_dirty() {
            let write_result = {
                let data = page.read();
                state.disk.write_page(old_page_id, &data[..])
            };
            if let Err(e) = write_result {
                self.replacer.insert(frame_id);
                return Err(e.into());
            }
            page.set_dirty(false);
        }

        self.page_table.remove(&old_page_id);
        page.set_id(INVALID_PAGE_ID);
        debug!(page_id = old_page_id, frame_id, "evicted page");
        Ok(Some(frame_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskResult, FileDiskManager};
    use crate::page::PAGE_SIZE;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn setup_pool(pool_size: usize) -> (TempDir, BufferPoolManager<FileDiskManager>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = FileDiskManager::open(temp_dir.path().join("test.db")).unwrap();
        (temp_dir, BufferPoolManager::new(pool_size, disk))
    }

    /// Disk store double counting the reads that reach it
    struct CountingStore {
        inner: FileDiskManager,
        reads: Arc<AtomicUsize>,
    }

    impl DiskStore for CountingStore {
        fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> DiskResult<()> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.read_page(page_id, buffer)
        }

        fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> DiskResult<()> {
            self.inner.write_page(page_id, buffer)
        }

        fn allocate_page(&mut self) -> DiskResult<PageId> {
            self.inner.allocate_page()
        }

        fn deallocate_page(&mut self, page_id: PageId) -> DiskResult<()> {
            self.inner.deallocate_page(page_id)
        }
    }

    #[test]
    fn test_new_page_pins_zeroed_frame() {
        let (_temp_dir, pool) = setup_pool(4);

        let page = pool.new_page().unwrap().unwrap();
        assert_eq!(page.id(), 0);
        assert_eq!(page.pin_count(), 1);
        assert!(!page.is_dirty());
        assert!(page.read().iter().all(|&b| b == 0));

        let next = pool.new_page().unwrap().unwrap();
        assert_eq!(next.id(), 1);
        assert_eq!(pool.free_frame_count(), 2);
    }

    #[test]
    fn test_fetch_returns_resident_page() {
        let (_temp_dir, pool) = setup_pool(4);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();
        page.write()[..5].copy_from_slice(b"hello");

        let again = pool.fetch_page(page_id).unwrap().unwrap();
        assert_eq!(again.pin_count(), 2);
        assert_eq!(&again.read()[..5], b"hello");
    }

    #[test]
    fn test_unpin_underflow_guard() {
        let (_temp_dir, pool) = setup_pool(4);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();

        assert!(pool.unpin_page(page_id, false));
        assert_eq!(page.pin_count(), 0);

        // A second unpin must fail without mutating anything: the dirty
        // flag stays clear and the pin count stays zero
        assert!(!pool.unpin_page(page_id, true));
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
        assert_eq!(pool.evictable_count(), 1);
    }

    #[test]
    fn test_unpin_nonresident_page() {
        let (_temp_dir, pool) = setup_pool(4);
        assert!(!pool.unpin_page(7, false));
    }

    #[test]
    fn test_unpin_dirty_flag_is_sticky() {
        let (_temp_dir, pool) = setup_pool(4);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();
        page.write()[0] = 9;
        assert!(pool.unpin_page(page_id, true));

        // A second holder unpinning clean must not lose the dirty mark
        let page = pool.fetch_page(page_id).unwrap().unwrap();
        assert!(pool.unpin_page(page_id, false));
        assert!(page.is_dirty());
    }

    #[test]
    fn test_fetch_resident_skips_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let reads = Arc::new(AtomicUsize::new(0));
        let disk = CountingStore {
            inner: FileDiskManager::open(temp_dir.path().join("test.db")).unwrap(),
            reads: Arc::clone(&reads),
        };
        let pool = BufferPoolManager::new(4, disk);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();
        pool.unpin_page(page_id, false);
        assert_eq!(reads.load(Ordering::Relaxed), 0);

        for _ in 0..3 {
            pool.fetch_page(page_id).unwrap().unwrap();
            pool.unpin_page(page_id, false);
        }
        assert_eq!(reads.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_round_trip_through_eviction() {
        let (_temp_dir, pool) = setup_pool(2);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();
        page.write()[..8].copy_from_slice(b"pagepool");
        assert!(pool.unpin_page(page_id, true));

        // Exhaust the pool so the dirty page gets evicted and written back
        for _ in 0..2 {
            let filler = pool.new_page().unwrap().unwrap();
            assert!(pool.unpin_page(filler.id(), false));
        }

        let page = pool.fetch_page(page_id).unwrap().unwrap();
        assert_eq!(&page.read()[..8], b"pagepool");
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_pool_exhaustion() {
        let (_temp_dir, pool) = setup_pool(2);

        let a = pool.new_page().unwrap().unwrap();
        let b = pool.new_page().unwrap().unwrap();

        // Every frame pinned: no new page and no fetch of an absent page
        assert!(pool.new_page().unwrap().is_none());
        assert!(pool.fetch_page(99).unwrap().is_none());

        // Releasing one pin makes a frame reclaimable again
        assert!(pool.unpin_page(a.id(), false));
        let c = pool.new_page().unwrap().unwrap();
        assert_eq!(c.frame_id(), a.frame_id());
        assert_eq!(b.pin_count(), 1);
    }

    #[test]
    fn test_lru_victim_order() {
        let (_temp_dir, pool) = setup_pool(3);

        let a = pool.new_page().unwrap().unwrap();
        let b = pool.new_page().unwrap().unwrap();
        let c = pool.new_page().unwrap().unwrap();
        pool.unpin_page(a.id(), false);
        pool.unpin_page(b.id(), false);
        pool.unpin_page(c.id(), false);

        // Touch a: re-pin and unpin moves it to the recent end
        pool.fetch_page(a.id()).unwrap().unwrap();
        pool.unpin_page(a.id(), false);

        let first = pool.new_page().unwrap().unwrap();
        assert_eq!(first.frame_id(), b.frame_id());
        let second = pool.new_page().unwrap().unwrap();
        assert_eq!(second.frame_id(), c.frame_id());
        let third = pool.new_page().unwrap().unwrap();
        assert_eq!(third.frame_id(), a.frame_id());
    }

    #[test]
    fn test_delete_pinned_page_refused() {
        let (_temp_dir, pool) = setup_pool(4);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();

        assert!(!pool.delete_page(page_id).unwrap());

        // Still resident and pinned
        let again = pool.fetch_page(page_id).unwrap().unwrap();
        assert_eq!(again.pin_count(), 2);
    }

    #[test]
    fn test_delete_returns_frame_to_free_list() {
        let (_temp_dir, pool) = setup_pool(1);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();
        let frame_id = page.frame_id();
        page.write()[0] = 0xAB;
        pool.unpin_page(page_id, true);
        assert_eq!(pool.free_frame_count(), 0);
        assert_eq!(pool.evictable_count(), 1);

        assert!(pool.delete_page(page_id).unwrap());
        assert_eq!(pool.free_frame_count(), 1);
        assert_eq!(pool.evictable_count(), 0);
        assert_eq!(page.id(), INVALID_PAGE_ID);

        // The freed frame is reused zeroed, and the disk id is recycled
        let reused = pool.new_page().unwrap().unwrap();
        assert_eq!(reused.frame_id(), frame_id);
        assert_eq!(reused.id(), page_id);
        assert!(reused.read().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_delete_unallocated_page_is_disk_error() {
        let (_temp_dir, pool) = setup_pool(2);
        assert!(pool.delete_page(99).is_err());
    }

    #[test]
    fn test_flush_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");
        let disk = FileDiskManager::open(&path).unwrap();
        let pool = BufferPoolManager::new(4, disk);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.id();
        page.write()[..7].copy_from_slice(b"durable");
        pool.unpin_page(page_id, true);

        assert!(pool.flush_page(page_id).unwrap());
        assert!(!page.is_dirty());

        // A clean resident page is a true no-op; absent pages report false
        assert!(pool.flush_page(page_id).unwrap());
        assert!(!pool.flush_page(12345).unwrap());
        assert!(!pool.flush_page(INVALID_PAGE_ID).unwrap());

        // The bytes reached the backing file
        let mut check = FileDiskManager::open(&path).unwrap();
        let mut buffer = vec![0u8; PAGE_SIZE];
        check.read_page(page_id, &mut buffer).unwrap();
        assert_eq!(&buffer[..7], b"durable");
    }

    #[test]
    fn test_flush_all_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");
        let disk = FileDiskManager::open(&path).unwrap();
        let pool = BufferPoolManager::new(4, disk);

        let mut page_ids = Vec::new();
        for i in 0..3u8 {
            let page = pool.new_page().unwrap().unwrap();
            page.write()[0] = i + 1;
            page_ids.push(page.id());
            pool.unpin_page(page.id(), true);
        }

        pool.flush_all_pages().unwrap();
        for &page_id in &page_ids {
            let page = pool.fetch_page(page_id).unwrap().unwrap();
            assert!(!page.is_dirty());
            pool.unpin_page(page_id, false);
        }

        let mut check = FileDiskManager::open(&path).unwrap();
        let mut buffer = vec![0u8; PAGE_SIZE];
        for (i, &page_id) in page_ids.iter().enumerate() {
            check.read_page(page_id, &mut buffer).unwrap();
            assert_eq!(buffer[0], i as u8 + 1);
        }
    }

    #[test]
    fn test_custom_replacer() {
        // MRU policy: evict the most recently unpinned frame
        struct MruReplacer {
            queue: Mutex<VecDeque<FrameId>>,
        }

        impl Replacer<FrameId> for MruReplacer {
            fn insert(&self, value: FrameId) {
                let mut queue = self.queue.lock().unwrap();
                if !queue.contains(&value) {
                    queue.push_back(value);
                }
            }

            fn victim(&self) -> Option<FrameId> {
                self.queue.lock().unwrap().pop_back()
            }

            fn erase(&self, value: &FrameId) -> bool {
                let mut queue = self.queue.lock().unwrap();
                match queue.iter().position(|v| v == value) {
                    Some(index) => queue.remove(index).is_some(),
                    None => false,
                }
            }

            fn len(&self) -> usize {
                self.queue.lock().unwrap().len()
            }
        }

        let temp_dir = tempfile::tempdir().unwrap();
        let disk = FileDiskManager::open(temp_dir.path().join("test.db")).unwrap();
        let replacer = MruReplacer {
            queue: Mutex::new(VecDeque::new()),
        };
        let pool = BufferPoolManager::with_replacer(3, disk, Box::new(replacer));

        let a = pool.new_page().unwrap().unwrap();
        let b = pool.new_page().unwrap().unwrap();
        let c = pool.new_page().unwrap().unwrap();
        pool.unpin_page(a.id(), false);
        pool.unpin_page(b.id(), false);
        pool.unpin_page(c.id(), false);

        // MRU picks c where LRU would have picked a
        let victim = pool.new_page().unwrap().unwrap();
        assert_eq!(victim.frame_id(), c.frame_id());
        assert!(pool.fetch_page(a.id()).unwrap().is_some());
        assert!(pool.fetch_page(b.id()).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_fetch_unpin() {
        let (_temp_dir, pool) = setup_pool(8);

        // Seed four pages
        let mut page_ids = Vec::new();
        for _ in 0..4 {
            let page = pool.new_page().unwrap().unwrap();
            page_ids.push(page.id());
            pool.unpin_page(page.id(), false);
        }

        std::thread::scope(|scope| {
            for thread in 0..4usize {
                let pool = &pool;
                let page_ids = &page_ids;
                scope.spawn(move || {
                    for round in 0..100 {
                        let page_id = page_ids[(thread + round) % page_ids.len()];
                        let page = pool.fetch_page(page_id).unwrap().unwrap();
                        page.write()[thread] = round as u8;
                        assert!(pool.unpin_page(page_id, true));
                    }
                });
            }
        });

        // All pins released: every page is evictable or free again
        assert_eq!(pool.evictable_count() + pool.free_frame_count(), 8);
        for &page_id in &page_ids {
            let page = pool.fetch_page(page_id).unwrap().unwrap();
            assert_eq!(page.pin_count(), 1);
            pool.unpin_page(page_id, false);
        }
    }
}

pub mod buffer;
pub mod disk;
pub mod hash;
pub mod page;

pub use buffer::{BufferError, BufferPoolManager, BufferResult, LruReplacer, Replacer};
pub use disk::{DiskError, DiskResult, DiskStore, FileDiskManager};
pub use hash::{DEFAULT_BUCKET_CAPACITY, ExtendibleHashTable};
pub use page::{FrameId, INVALID_PAGE_ID, PAGE_SIZE, Page, PageId};

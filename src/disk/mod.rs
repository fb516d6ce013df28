mod error;
mod manager;

pub use error::{DiskError, DiskResult};
pub use manager::{DiskStore, FileDiskManager};

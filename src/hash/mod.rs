//! Concurrent extensible hash table

mod extendible;

pub use extendible::{DEFAULT_BUCKET_CAPACITY, ExtendibleHashTable};

//! Cache bucket storage for offline asset access.
//!
//! Buckets are named, versioned collections of request→response entries.
//! The `CacheStorage` trait abstracts where they live:
//! - `MemoryStorage`: process-local, used by tests and embedders
//! - `DiskStorage`: one JSON file per bucket under the cache directory
//!
//! Every entry is wrapped in `CachedData` so its age can be reported.

pub mod disk;
pub mod entry;
pub mod memory;
pub mod storage;

pub use disk::DiskStorage;
pub use entry::CachedData;
pub use memory::MemoryStorage;
pub use storage::{match_any, validate_bucket_name, CacheStorage, StorageResult};

//! Write-back caching for archive-backed mounts.

mod fs;
mod write_cache;

pub use fs::CacheFs;
pub use write_cache::{Staged, WriteCacheConfig};

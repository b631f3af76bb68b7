//! Journaling block cache: the layer between a Unix-like file system and the
//! raw disk. Blocks are cached with LRU reuse, multi-block updates are made
//! atomic by a write-ahead log with group commit, and data blocks are handed
//! out by a bitmap allocator whose updates ride in the same log.

pub mod bitmap; // free-block bitmap allocator
pub mod block_cache; // cache for block devices
pub mod block_device;
pub mod common;
pub mod config;
pub mod disk; // on-disk structures
pub mod error;
pub mod logger; // write-ahead log
pub mod mkfs;
pub mod swap;
pub mod volume;

pub use block_cache::{BlockCache, BlockGuard};
pub use block_device::{BlockDevice, FileBlockDevice, MemBlockDevice};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use logger::{LogManager, LogStats, OpContext};
pub use volume::Volume;

//! Error type shared by the cache, the log and the allocators.
//!
//! Resource exhaustion and device failures come back as [`CacheError`].
//! Broken caller contracts (freeing a free block, closing an operation while a
//! commit runs, overflowing a header that admission control should have kept
//! small) stay `assert!`s.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Host I/O error outside block transfers, e.g. opening an image file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block transfer failed.
    #[error("device error at block {block_no}: {source}")]
    Device {
        block_no: usize,
        #[source]
        source: std::io::Error,
    },

    /// No clear bit left in the bitmap, or no free swap slot.
    #[error("out of space")]
    OutOfSpace,

    /// The operation already dirtied as many distinct blocks as it reserved.
    #[error("operation exceeded its budget of {limit} blocks")]
    QuotaExceeded { limit: usize },

    #[error("block {0} is outside the volume")]
    InvalidBlock(usize),

    /// The super block does not describe a volume we can mount.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    #[error("corrupt metadata at block {block_no}: {detail}")]
    Corruption { block_no: usize, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A commit failed part way; nothing more is accepted until remount.
    #[error("log is poisoned by a failed commit")]
    Poisoned,

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

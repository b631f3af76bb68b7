use super::*;
use block_cache::BlockCache;
use common::*;
use logger::{LogManager, OpContext};

use log::debug;
use std::sync::Arc;

/// Free-block bitmap: bit `b` (LSB first) of the region starting at `start`
/// is set while block `b` is in use.
pub struct BitMap {
    start: usize,
    /// first data block; the bits below it cover metadata and stay set
    first: usize,
    /// block numbers the bitmap hands out are below `limit`
    limit: usize,
    cache: Arc<BlockCache>,
    log_mgr: Arc<LogManager>,
}

/// index of the first clear bit below `n`
fn first_clear(bits: &[u8], n: usize) -> Option<usize> {
    bits.iter()
        .enumerate()
        .take(n.div_ceil(8))
        .find(|&(_, &byte)| byte != 0xff)
        .map(|(i, &byte)| i * 8 + byte.trailing_ones() as usize)
        .filter(|&j| j < n)
}

impl BitMap {
    pub fn new(
        start: usize,
        first: usize,
        limit: usize,
        cache: Arc<BlockCache>,
        log_mgr: Arc<LogManager>,
    ) -> Self {
        Self {
            start,
            first,
            limit,
            cache,
            log_mgr,
        }
    }

    /// Allocate a zeroed block. Must run inside an operation, which the
    /// bitmap block and the zeroed block are charged to.
    pub fn alloc(&self, ctx: &mut OpContext) -> Result<usize> {
        for bi in 0..self.limit.div_ceil(BPB) {
            let base = bi * BPB;
            let bitmap_blockno = self.start + bi;
            let mut bp = self.cache.acquire(bitmap_blockno)?;
            let Some(j) = first_clear(bp.data(), (self.limit - base).min(BPB)) else {
                continue;
            };
            let bno = base + j;
            self.reserve(ctx, &[bitmap_blockno, bno])?;
            // last fallible step: the bit may only change once `bno` is held
            let mut zp = self.cache.acquire(bno)?;

            bp.data_mut()[j / 8] |= 1 << (j % 8);
            self.log_mgr.sync(Some(ctx), &bp)?;
            self.cache.release(bp);
            zp.data_mut().fill(0);
            self.log_mgr.sync(Some(ctx), &zp)?;
            debug!("bitmap: alloc {bno}");
            return Ok(bno);
        }
        Err(CacheError::OutOfSpace)
    }

    /// Mark `bno` free. Freeing a free block is a caller bug and panics.
    pub fn free(&self, ctx: &mut OpContext, bno: usize) -> Result<()> {
        if bno < self.first || bno >= self.limit {
            return Err(CacheError::InvalidBlock(bno));
        }
        let bitmap_blockno = self.start + bno / BPB;
        let mut bp = self.cache.acquire(bitmap_blockno)?;
        let bj = bno % BPB;
        let mask = 1 << (bj % 8);
        assert!(bp.data()[bj / 8] & mask != 0, "bitmap: freeing free block {bno}");
        self.reserve(ctx, &[bitmap_blockno])?;

        bp.data_mut()[bj / 8] &= !mask;
        self.log_mgr.sync(Some(ctx), &bp)?;
        debug!("bitmap: free {bno}");
        Ok(())
    }

    /// # of clear bits. Diagnostic, reads outside any operation.
    pub fn free_blocks(&self) -> Result<usize> {
        let mut free = 0;
        for bi in 0..self.limit.div_ceil(BPB) {
            let n = (self.limit - bi * BPB).min(BPB);
            let bp = self.cache.acquire(self.start + bi)?;
            let used: usize = (0..n)
                .filter(|&j| bp.data()[j / 8] & (1 << (j % 8)) != 0)
                .count();
            free += n - used;
        }
        Ok(free)
    }

    /// Fail before touching anything if `blocks` can't all be logged by `ctx`.
    fn reserve(&self, ctx: &OpContext, blocks: &[usize]) -> Result<()> {
        let needed = blocks
            .iter()
            .filter(|&&b| !self.log_mgr.is_logged(b))
            .count();
        if ctx.remaining() < needed {
            return Err(CacheError::QuotaExceeded {
                limit: self.log_mgr.op_max_num_blocks(),
            });
        }
        Ok(())
    }
}

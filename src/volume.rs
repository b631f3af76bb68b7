use super::*;
use bitmap::BitMap;
use block_cache::{BlockCache, BlockGuard};
use block_device::BlockDevice;
use common::*;
use config::CacheConfig;
use disk::SuperBlock;
use logger::{LogManager, LogStats, OpContext};
use swap::SwapMap;

use log::info;
use std::sync::Arc;

/// A mounted volume: the cache, the log and the allocators over one device.
pub struct Volume {
    bitmap: BitMap,
    blk_cch: Arc<BlockCache>,
    log_mgr: Arc<LogManager>,
    swap: SwapMap,
    super_blk: SuperBlock,
}

impl Volume {
    /// Read the super block, replay the log and get ready for operations.
    pub fn mount(blk_dev: Arc<dyn BlockDevice>, config: CacheConfig) -> Result<Self> {
        let super_blk = SuperBlock::read(blk_dev.as_ref())?;
        if blk_dev.num_blocks() < super_blk.num_blocks as usize {
            return Err(CacheError::Format(format!(
                "device has {} blocks, super block says {}",
                blk_dev.num_blocks(),
                super_blk.num_blocks
            )));
        }
        config.validate(super_blk.log_capacity())?;

        let blk_cch = Arc::new(BlockCache::new(blk_dev, config.eviction_threshold));
        let log_mgr = Arc::new(LogManager::new(
            Arc::clone(&blk_cch),
            super_blk.log_start as usize,
            super_blk.log_capacity(),
            config.op_max_num_blocks,
        )?);
        let bitmap = BitMap::new(
            super_blk.bitmap_start as usize,
            super_blk.data_start(),
            super_blk.alloc_limit(),
            Arc::clone(&blk_cch),
            Arc::clone(&log_mgr),
        );
        let swap = SwapMap::new(
            super_blk.swap_start as usize,
            (super_blk.num_blocks - super_blk.swap_start) as usize,
            Arc::clone(&blk_cch),
            Arc::clone(&log_mgr),
        );
        info!(
            "mount: {} blocks, {} log slots, {} recovered",
            super_blk.num_blocks,
            log_mgr.capacity(),
            log_mgr.stats().recovered
        );
        Ok(Self {
            bitmap,
            blk_cch,
            log_mgr,
            swap,
            super_blk,
        })
    }

    pub fn acquire(&self, blockno: usize) -> Result<BlockGuard<'_>> {
        if blockno >= self.super_blk.num_blocks as usize {
            return Err(CacheError::InvalidBlock(blockno));
        }
        self.blk_cch.acquire(blockno)
    }

    pub fn release(&self, block: BlockGuard<'_>) {
        self.blk_cch.release(block)
    }

    pub fn begin_op(&self) -> Result<OpContext> {
        self.log_mgr.begin_op()
    }

    /// `None` writes the block through immediately, outside any transaction.
    pub fn sync(&self, ctx: Option<&mut OpContext>, block: &BlockGuard<'_>) -> Result<()> {
        self.log_mgr.sync(ctx, block)
    }

    pub fn end_op(&self, ctx: OpContext) -> Result<()> {
        self.log_mgr.end_op(ctx)
    }

    pub fn alloc(&self, ctx: &mut OpContext) -> Result<usize> {
        self.bitmap.alloc(ctx)
    }

    pub fn free(&self, ctx: &mut OpContext, bno: usize) -> Result<()> {
        self.bitmap.free(ctx, bno)
    }

    /// Save a page to a fresh swap slot; returns the slot's first block.
    pub fn swap_out(&self, page: &[u8; PAGE_SIZE]) -> Result<usize> {
        let bno = self.swap.alloc_slot()?;
        if let Err(e) = self.swap.write_page(bno, page) {
            self.swap.release_slot(bno);
            return Err(e);
        }
        Ok(bno)
    }

    pub fn swap_in(&self, bno: usize, page: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.swap.read_page(bno, page)
    }

    pub fn release_swap(&self, bno: usize) {
        self.swap.release_slot(bno)
    }

    pub fn num_cached_blocks(&self) -> usize {
        self.blk_cch.num_cached_blocks()
    }

    pub fn free_blocks(&self) -> Result<usize> {
        self.bitmap.free_blocks()
    }

    pub fn log_stats(&self) -> LogStats {
        self.log_mgr.stats()
    }

    pub fn super_blk(&self) -> &SuperBlock {
        &self.super_blk
    }

    pub fn blk_cch(&self) -> Arc<BlockCache> {
        Arc::clone(&self.blk_cch)
    }

    pub fn log_mgr(&self) -> Arc<LogManager> {
        Arc::clone(&self.log_mgr)
    }
}

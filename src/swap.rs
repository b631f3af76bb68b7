//! Swap area: page-sized slots of `SWAP_SLOT_BLOCKS` contiguous blocks.
//!
//! The slot map lives in memory only; after a reboot nothing in swap is
//! reachable, so every slot starts free. Page I/O is written through the
//! cache without the log.

use super::*;
use block_cache::BlockCache;
use common::*;
use logger::LogManager;

use parking_lot::Mutex;
use std::sync::Arc;

pub struct SwapMap {
    start: usize,
    used: Mutex<Vec<bool>>,
    cache: Arc<BlockCache>,
    log_mgr: Arc<LogManager>,
}

impl SwapMap {
    pub fn new(start: usize, num_blocks: usize, cache: Arc<BlockCache>, log_mgr: Arc<LogManager>) -> Self {
        Self {
            start,
            used: Mutex::new(vec![false; num_blocks / SWAP_SLOT_BLOCKS]),
            cache,
            log_mgr,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.used.lock().len()
    }

    /// Reserve a slot and return its first block number.
    pub fn alloc_slot(&self) -> Result<usize> {
        let mut used = self.used.lock();
        let slot = used
            .iter()
            .position(|&u| !u)
            .ok_or(CacheError::OutOfSpace)?;
        used[slot] = true;
        Ok(self.start + slot * SWAP_SLOT_BLOCKS)
    }

    pub fn release_slot(&self, bno: usize) {
        let slot = self.slot_of(bno);
        let mut used = self.used.lock();
        assert!(used[slot], "swap: releasing free slot at {bno}");
        used[slot] = false;
    }

    pub fn write_page(&self, bno: usize, page: &[u8; PAGE_SIZE]) -> Result<()> {
        self.slot_of(bno);
        for (i, chunk) in page.chunks_exact(BSIZE).enumerate() {
            let mut bp = self.cache.acquire(bno + i)?;
            bp.data_mut().copy_from_slice(chunk);
            self.log_mgr.sync(None, &bp)?;
        }
        Ok(())
    }

    pub fn read_page(&self, bno: usize, page: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.slot_of(bno);
        for (i, chunk) in page.chunks_exact_mut(BSIZE).enumerate() {
            let bp = self.cache.acquire(bno + i)?;
            chunk.copy_from_slice(bp.data());
        }
        Ok(())
    }

    fn slot_of(&self, bno: usize) -> usize {
        assert!(
            bno >= self.start && (bno - self.start) % SWAP_SLOT_BLOCKS == 0,
            "swap: {bno} is not the start of a slot"
        );
        let slot = (bno - self.start) / SWAP_SLOT_BLOCKS;
        assert!(slot < self.num_slots(), "swap: {bno} is past the swap area");
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_device::MemBlockDevice;

    const SWAP_START: usize = 32;

    fn setup(dev: &MemBlockDevice) -> SwapMap {
        let cache = Arc::new(BlockCache::new(Arc::new(dev.clone()), EVICTION_THRESHOLD));
        let log_mgr = Arc::new(LogManager::new(Arc::clone(&cache), 0, 10, 10).unwrap());
        SwapMap::new(SWAP_START, 2 * SWAP_SLOT_BLOCKS, cache, log_mgr)
    }

    #[test]
    fn slots_are_handed_out_in_order() {
        let dev = MemBlockDevice::new(SWAP_START + 2 * SWAP_SLOT_BLOCKS);
        let swap = setup(&dev);
        assert_eq!(swap.alloc_slot().unwrap(), SWAP_START);
        let second = swap.alloc_slot().unwrap();
        assert_eq!(second, SWAP_START + SWAP_SLOT_BLOCKS);
        assert!(matches!(swap.alloc_slot(), Err(CacheError::OutOfSpace)));
        swap.release_slot(second);
        assert_eq!(swap.alloc_slot().unwrap(), second);
    }

    #[test]
    fn pages_are_written_through() {
        let dev = MemBlockDevice::new(SWAP_START + 2 * SWAP_SLOT_BLOCKS);
        let swap = setup(&dev);
        let bno = swap.alloc_slot().unwrap();
        let mut page = [0u8; PAGE_SIZE];
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = (i / BSIZE) as u8 + 1;
        }
        swap.write_page(bno, &page).unwrap();
        assert_eq!(dev.snapshot(bno + 3), [4; BSIZE]);

        // a fresh mount reads the page back from disk
        let swap = setup(&dev);
        let mut back = [0u8; PAGE_SIZE];
        swap.read_page(bno, &mut back).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    #[should_panic(expected = "releasing free slot")]
    fn releasing_a_free_slot_panics() {
        let dev = MemBlockDevice::new(SWAP_START + 2 * SWAP_SLOT_BLOCKS);
        setup(&dev).release_slot(SWAP_START);
    }
}

//! Buffer cache.
//!
//! Every disk block the file system touches goes through here. The cache is a
//! list of slots ordered from least to most recently released; a slot is
//! addressed by block number and reused for another block once it is neither
//! held nor pinned by the log.
//!
//! Two locks: the structural lock (`state`) guards the list and each slot's
//! flags, and is never held across device I/O. Each slot also owns its content
//! lock, which a caller holds for as long as it has the block acquired.

use super::*;
use block_device::BlockDevice;
use common::*;

use log::trace;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;

struct BlockData {
    blockno: usize,
    data: [u8; BSIZE],
}

struct Slot {
    blockno: usize,
    /// holders plus threads blocked on `content`; the slot can't be reused while > 0
    refs: usize,
    /// listed in the log header of the next commit
    pinned: bool,
    /// has data been read from disk?
    valid: bool,
    content: Arc<Mutex<BlockData>>,
}

struct CacheState {
    /// LRU order, front is the least recently used
    slots: Vec<Slot>,
}

impl CacheState {
    fn position(&self, blockno: usize) -> Option<usize> {
        self.slots.iter().position(|s| s.blockno == blockno)
    }

    fn slot_mut(&mut self, blockno: usize) -> &mut Slot {
        let pos = self
            .position(blockno)
            .unwrap_or_else(|| panic!("bcache: block {blockno} is not resident"));
        &mut self.slots[pos]
    }
}

pub struct BlockCache {
    state: Mutex<CacheState>,
    blk_dev: Arc<dyn BlockDevice>,
    eviction_threshold: usize,
}

impl BlockCache {
    pub fn new(blk_dev: Arc<dyn BlockDevice>, eviction_threshold: usize) -> Self {
        Self {
            state: Mutex::new(CacheState { slots: Vec::new() }),
            blk_dev,
            eviction_threshold,
        }
    }

    pub fn block_device(&self) -> Arc<dyn BlockDevice> {
        Arc::clone(&self.blk_dev)
    }

    /// Number of resident slots, held or not.
    pub fn num_cached_blocks(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Return the only live handle to `blockno`, blocking while someone else
    /// holds it. The content is read from disk the first time the slot is used
    /// for this block.
    pub fn acquire(&self, blockno: usize) -> Result<BlockGuard<'_>> {
        let content = {
            let mut state = self.state.lock();
            if let Some(pos) = state.position(blockno) {
                let slot = &mut state.slots[pos];
                slot.refs += 1;
                trace!("bcache: hit {blockno}");
                Arc::clone(&slot.content)
            } else if let Some(pos) = self.victim(&state) {
                let slot = &mut state.slots[pos];
                trace!("bcache: evict {} for {blockno}", slot.blockno);
                slot.blockno = blockno;
                slot.valid = false;
                slot.refs = 1;
                Arc::clone(&slot.content)
            } else {
                let content = Arc::new(Mutex::new(BlockData {
                    blockno,
                    data: [0; BSIZE],
                }));
                state.slots.push(Slot {
                    blockno,
                    refs: 1,
                    pinned: false,
                    valid: false,
                    content: Arc::clone(&content),
                });
                trace!("bcache: new slot for {blockno}");
                content
            }
        };

        // refs > 0 keeps the slot bound to `blockno` while we sleep here
        let mut guard = BlockGuard {
            cache: self,
            blockno,
            content: Some(content.lock_arc()),
        };
        if !self.state.lock().slot_mut(blockno).valid {
            let content = guard.content_mut();
            content.blockno = blockno;
            self.blk_dev
                .read_block(blockno, &mut content.data)
                .map_err(|source| CacheError::Device {
                    block_no: blockno,
                    source,
                })?;
            self.state.lock().slot_mut(blockno).valid = true;
        }
        Ok(guard)
    }

    /// Give the block back. Same as dropping the guard.
    pub fn release(&self, guard: BlockGuard<'_>) {
        assert!(std::ptr::eq(self, guard.cache), "bcache: foreign block guard");
        drop(guard);
    }

    /// Write the held block straight to disk, outside any transaction.
    pub fn write_through(&self, guard: &BlockGuard<'_>) -> Result<()> {
        self.blk_dev
            .write_block(guard.blockno, guard.data())
            .map_err(|source| CacheError::Device {
                block_no: guard.blockno,
                source,
            })
    }

    /// Keep `blockno` resident until [`unpin`](Self::unpin). The caller holds it.
    pub fn pin(&self, blockno: usize) {
        self.state.lock().slot_mut(blockno).pinned = true;
    }

    pub fn unpin(&self, blockno: usize) {
        let mut state = self.state.lock();
        if let Some(pos) = state.position(blockno) {
            state.slots[pos].pinned = false;
        }
    }

    pub fn is_pinned(&self, blockno: usize) -> bool {
        let state = self.state.lock();
        state
            .position(blockno)
            .is_some_and(|pos| state.slots[pos].pinned)
    }

    /// Least recently used slot that nobody holds and the log doesn't need,
    /// once the cache has reached its threshold.
    fn victim(&self, state: &CacheState) -> Option<usize> {
        if state.slots.len() < self.eviction_threshold {
            return None;
        }
        state.slots.iter().position(|s| s.refs == 0 && !s.pinned)
    }

    fn put(&self, blockno: usize) {
        let mut state = self.state.lock();
        let pos = state
            .position(blockno)
            .unwrap_or_else(|| panic!("bcache: releasing non-resident block {blockno}"));
        assert!(state.slots[pos].refs > 0, "bcache: block {blockno} released twice");
        let mut slot = state.slots.remove(pos);
        slot.refs -= 1;
        state.slots.push(slot);
    }
}

/// Exclusive access to one cached block. Dropping it releases the block.
pub struct BlockGuard<'a> {
    cache: &'a BlockCache,
    blockno: usize,
    content: Option<ArcMutexGuard<RawMutex, BlockData>>,
}

impl BlockGuard<'_> {
    pub fn blockno(&self) -> usize {
        self.blockno
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        &self.content().data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.content_mut().data
    }

    fn content(&self) -> &BlockData {
        let content = self.content.as_deref().expect("block guard used after release");
        debug_assert_eq!(content.blockno, self.blockno);
        content
    }

    fn content_mut(&mut self) -> &mut BlockData {
        self.content
            .as_deref_mut()
            .expect("block guard used after release")
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        // unlock the content before the slot becomes a reuse candidate
        drop(self.content.take());
        self.cache.put(self.blockno);
    }
}

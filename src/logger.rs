//! Write-ahead log with group commit. A typical use is:
//!   let mut ctx = log.begin_op()?;
//!   let mut bp = cache.acquire(blockno)?;
//!   modify bp.data_mut()
//!   log.sync(Some(&mut ctx), &bp)?;
//!   cache.release(bp);
//!   log.end_op(ctx)?;
//!
//! `sync` only records the block number; the last operation to close writes
//! every recorded block to the log region, commits the header, installs the
//! blocks at their home locations and erases the header again.

use super::*;
use block_cache::{BlockCache, BlockGuard};
use block_device::BlockDevice;
use common::*;
use disk::LogHeader;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Handle of one open operation: how many more distinct blocks it may dirty.
#[derive(Debug)]
pub struct OpContext {
    rm: usize,
}

impl OpContext {
    pub fn remaining(&self) -> usize {
        self.rm
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    /// commits that wrote at least one block
    pub commits: u64,
    pub blocks_committed: u64,
    /// `sync` calls that found their block already logged
    pub absorbed: u64,
    /// blocks installed by recovery
    pub recovered: u64,
}

struct LogState {
    /// in commit(), please wait.
    committing: bool,
    /// how many FS ops are executing.
    outstanding: usize,
    /// credits held by open ops and not yet turned into header entries
    op_reserved: usize,
    header: LogHeader,
    /// bumped whenever a commit finishes, successfully or not
    commit_seq: u64,
    poisoned: bool,
    stats: LogStats,
}

pub struct LogManager {
    /// block number of the log header
    start: usize,
    /// # of log slots
    capacity: usize,
    op_max_num_blocks: usize,
    cache: Arc<BlockCache>,
    blk_dev: Arc<dyn BlockDevice>,
    state: Mutex<LogState>,
    /// begin_op waits here for log space or for a commit to end
    space: Condvar,
    /// end_op waits here for the commit that carries its blocks
    committed: Condvar,
}

impl LogManager {
    /// Set up the log over `[log_start, log_start + capacity]` and replay
    /// whatever a previous mount left committed there.
    pub fn new(
        cache: Arc<BlockCache>,
        log_start: usize,
        capacity: usize,
        op_max_num_blocks: usize,
    ) -> Result<Self> {
        if capacity > LOG_MAX_SIZE {
            return Err(CacheError::InvalidConfig(format!(
                "log of {capacity} slots does not fit one header block ({LOG_MAX_SIZE})"
            )));
        }
        if op_max_num_blocks == 0 || op_max_num_blocks > capacity {
            return Err(CacheError::InvalidConfig(format!(
                "{op_max_num_blocks} blocks per operation do not fit a log of {capacity}"
            )));
        }
        let log_mgr = LogManager {
            start: log_start,
            capacity,
            op_max_num_blocks,
            blk_dev: cache.block_device(),
            cache,
            state: Mutex::new(LogState {
                committing: false,
                outstanding: 0,
                op_reserved: 0,
                header: LogHeader::default(),
                commit_seq: 0,
                poisoned: false,
                stats: LogStats::default(),
            }),
            space: Condvar::new(),
            committed: Condvar::new(),
        };
        log_mgr.recover()?;
        Ok(log_mgr)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn op_max_num_blocks(&self) -> usize {
        self.op_max_num_blocks
    }

    pub fn stats(&self) -> LogStats {
        self.state.lock().stats
    }

    /// Is `blockno` already part of the next commit?
    pub fn is_logged(&self, blockno: usize) -> bool {
        self.state.lock().header.contains(blockno)
    }

    /// Called at the start of each FS operation. Waits while a commit runs or
    /// while the log could not take this operation's worst case on top of
    /// everything already logged or reserved.
    pub fn begin_op(&self) -> Result<OpContext> {
        let mut st = self.state.lock();
        loop {
            if st.poisoned {
                return Err(CacheError::Poisoned);
            }
            if st.committing
                || st.header.num_blocks() + st.op_reserved + self.op_max_num_blocks
                    > self.capacity
            {
                self.space.wait(&mut st);
            } else {
                break;
            }
        }
        st.outstanding += 1;
        st.op_reserved += self.op_max_num_blocks;
        Ok(OpContext {
            rm: self.op_max_num_blocks,
        })
    }

    /// Caller has modified the block and still holds it. With a context, record
    /// the block number for the next commit and pin the block in the cache;
    /// without one, write it to disk right now.
    pub fn sync(&self, ctx: Option<&mut OpContext>, block: &BlockGuard<'_>) -> Result<()> {
        let Some(ctx) = ctx else {
            return self.cache.write_through(block);
        };
        let blockno = block.blockno();
        let mut st = self.state.lock();
        assert!(st.outstanding > 0, "log: sync outside of an operation");
        if st.header.contains(blockno) {
            st.stats.absorbed += 1;
            return Ok(());
        }
        if ctx.rm == 0 {
            return Err(CacheError::QuotaExceeded {
                limit: self.op_max_num_blocks,
            });
        }
        // admission control in begin_op guarantees room
        assert!(
            st.header.num_blocks() < self.capacity,
            "log: too big a transaction"
        );
        st.header.push(blockno)?;
        self.cache.pin(blockno);
        ctx.rm -= 1;
        st.op_reserved -= 1;
        Ok(())
    }

    /// Called at the end of each FS operation. The last one to leave commits
    /// for everybody; the others wait until that commit is done.
    pub fn end_op(&self, ctx: OpContext) -> Result<()> {
        let mut st = self.state.lock();
        assert!(!st.committing, "log: end_op while committing");
        assert!(st.outstanding > 0, "log: end_op without begin_op");
        st.outstanding -= 1;
        st.op_reserved -= ctx.rm;

        if st.outstanding > 0 {
            // begin_op may be waiting for the credits given back above
            self.space.notify_all();
            let seq = st.commit_seq;
            while st.commit_seq == seq {
                self.committed.wait(&mut st);
            }
            return if st.poisoned {
                Err(CacheError::Poisoned)
            } else {
                Ok(())
            };
        }

        st.committing = true;
        let header = std::mem::take(&mut st.header);
        drop(st);

        // no log lock here: commit sleeps on block locks and the device
        let result = self.commit(&header);

        let mut st = self.state.lock();
        st.committing = false;
        st.commit_seq += 1;
        match &result {
            Ok(()) if !header.is_empty() => {
                st.stats.commits += 1;
                st.stats.blocks_committed += header.num_blocks() as u64;
            }
            Ok(()) => {}
            Err(e) => {
                warn!("log: commit of {} blocks failed: {e}", header.num_blocks());
                st.poisoned = true;
                for blockno in header.iter() {
                    self.cache.unpin(blockno);
                }
            }
        }
        drop(st);
        self.space.notify_all();
        self.committed.notify_all();
        result
    }

    /// Install a committed transaction left in the log, then erase it.
    /// Returns the number of blocks installed; an empty log costs no writes.
    pub fn recover(&self) -> Result<usize> {
        {
            let mut st = self.state.lock();
            assert!(
                st.outstanding == 0 && !st.committing,
                "log: recovery with open operations"
            );
            st.committing = true;
        }
        let result = self.replay();
        let mut st = self.state.lock();
        st.committing = false;
        if let Ok(n) = result {
            st.stats.recovered += n as u64;
        }
        drop(st);
        self.space.notify_all();
        result
    }

    fn replay(&self) -> Result<usize> {
        let header = self.read_head()?;
        if header.is_empty() {
            return Ok(0);
        }
        info!("log: recovering {} blocks", header.num_blocks());
        self.install_trans(&header)?;
        self.write_head(&LogHeader::default())?;
        Ok(header.num_blocks())
    }

    fn commit(&self, header: &LogHeader) -> Result<()> {
        if header.is_empty() {
            return Ok(());
        }
        debug!("log: commit {} blocks", header.num_blocks());
        self.write_log(header)?; // modified blocks from cache to log
        self.write_head(header)?; // header to disk -- the real commit
        self.install_trans(header)?; // now install writes to home locations
        self.write_head(&LogHeader::default())?; // erase the transaction from the log
        debug!("log: commit done");
        Ok(())
    }

    /// data_blocks(cache) -> log_blocks(disk).
    fn write_log(&self, header: &LogHeader) -> Result<()> {
        for (tail, blockno) in header.iter().enumerate() {
            let from = self.cache.acquire(blockno)?;
            self.dev_write(self.start + tail + 1, from.data())?;
        }
        Ok(())
    }

    /// log_blocks(disk) -> data_blocks(disk), keeping cached copies in step.
    /// Safe to repeat.
    fn install_trans(&self, header: &LogHeader) -> Result<()> {
        let mut buf = [0; BSIZE];
        for (tail, blockno) in header.iter().enumerate() {
            self.dev_read(self.start + tail + 1, &mut buf)?;
            let mut to = self.cache.acquire(blockno)?;
            to.data_mut().copy_from_slice(&buf);
            self.cache.write_through(&to)?;
            self.cache.unpin(blockno);
        }
        Ok(())
    }

    fn read_head(&self) -> Result<LogHeader> {
        let mut buf = [0; BSIZE];
        self.dev_read(self.start, &mut buf)?;
        LogHeader::decode(&buf, self.capacity, self.start)
    }

    fn write_head(&self, header: &LogHeader) -> Result<()> {
        self.dev_write(self.start, &header.encode()?)
    }

    fn dev_read(&self, blockno: usize, buf: &mut [u8; BSIZE]) -> Result<()> {
        self.blk_dev
            .read_block(blockno, buf)
            .map_err(|source| CacheError::Device {
                block_no: blockno,
                source,
            })
    }

    fn dev_write(&self, blockno: usize, buf: &[u8; BSIZE]) -> Result<()> {
        self.blk_dev
            .write_block(blockno, buf)
            .map_err(|source| CacheError::Device {
                block_no: blockno,
                source,
            })
    }
}

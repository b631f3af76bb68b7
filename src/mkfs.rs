//! Lay out a fresh volume. Writes go straight to the device: there is no log
//! to protect yet.

use super::*;
use block_device::BlockDevice;
use common::*;
use disk::{LogHeader, SuperBlock};

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub num_blocks: u32,
    pub num_inodes: u32,
    /// log header plus slots
    pub num_log_blocks: u32,
    /// multiple of `SWAP_SLOT_BLOCKS`, may be 0
    pub num_swap_blocks: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            num_blocks: FSSIZE,
            num_inodes: 200,
            num_log_blocks: 64,
            num_swap_blocks: 64,
        }
    }
}

impl Geometry {
    pub fn super_block(&self) -> Result<SuperBlock> {
        let log_start = SUPER_BLOCK_NO as u32 + 1;
        let inode_start = log_start + self.num_log_blocks;
        let inode_blocks = (self.num_inodes as usize).div_ceil(IPB) as u32;
        let bitmap_start = inode_start + inode_blocks;
        let bitmap_blocks = (self.num_blocks as usize).div_ceil(BPB) as u32;
        let data_start = bitmap_start + bitmap_blocks;
        let swap_start = self
            .num_blocks
            .checked_sub(self.num_swap_blocks)
            .filter(|&s| s > data_start)
            .ok_or_else(|| {
                CacheError::Format(format!("{self:?} leaves no room for data blocks"))
            })?;
        let sb = SuperBlock {
            magic: FSMAGIC,
            num_blocks: self.num_blocks,
            num_data_blocks: swap_start - data_start,
            num_inodes: self.num_inodes,
            num_log_blocks: self.num_log_blocks,
            log_start,
            inode_start,
            bitmap_start,
            swap_start,
        };
        // round-trip through the checks mount applies
        SuperBlock::decode(&sb.encode()?)
    }
}

fn write(blk_dev: &dyn BlockDevice, blockno: usize, buf: &[u8; BSIZE]) -> Result<()> {
    blk_dev
        .write_block(blockno, buf)
        .map_err(|source| CacheError::Device {
            block_no: blockno,
            source,
        })
}

/// Format `blk_dev` and return the super block written to it. Every block in
/// front of the first data block is marked used in the bitmap.
pub fn format(blk_dev: &dyn BlockDevice, geometry: &Geometry) -> Result<SuperBlock> {
    let sb = geometry.super_block()?;
    if blk_dev.num_blocks() < sb.num_blocks as usize {
        return Err(CacheError::Format(format!(
            "device has {} blocks, volume needs {}",
            blk_dev.num_blocks(),
            sb.num_blocks
        )));
    }

    write(blk_dev, SUPER_BLOCK_NO, &sb.encode()?)?;
    write(blk_dev, sb.log_start as usize, &LogHeader::default().encode()?)?;

    let zero = [0; BSIZE];
    for bno in sb.inode_start..sb.bitmap_start {
        write(blk_dev, bno as usize, &zero)?;
    }

    let data_start = sb.data_start();
    for bi in 0..(sb.num_blocks as usize).div_ceil(BPB) {
        let mut bits = [0; BSIZE];
        let base = bi * BPB;
        for b in base..data_start.min(base + BPB) {
            let bj = b - base;
            bits[bj / 8] |= 1 << (bj % 8);
        }
        write(blk_dev, sb.bitmap_start as usize + bi, &bits)?;
    }

    info!(
        "mkfs: {} blocks, log at {} ({} blocks), bitmap at {}, data {}..{}, swap {}..{}",
        sb.num_blocks,
        sb.log_start,
        sb.num_log_blocks,
        sb.bitmap_start,
        data_start,
        sb.swap_start,
        sb.swap_start,
        sb.num_blocks
    );
    Ok(sb)
}

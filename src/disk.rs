//! Disk layout:
//! [ boot block | super block | log header + log slots | inode blocks | free bit map | data blocks | swap ]
//!
//! Everything is little-endian, encoded with bincode.

use super::*;
use block_device::BlockDevice;
use common::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SuperBlock {
    /// Must be FSMAGIC
    pub magic: u32,
    /// Size of file system image (blocks)
    pub num_blocks: u32,
    /// Number of data blocks
    pub num_data_blocks: u32,
    /// Number of inodes
    pub num_inodes: u32,
    /// Number of log blocks, header included
    pub num_log_blocks: u32,
    /// Block number of the log header
    pub log_start: u32,
    /// Block number of first inode block
    pub inode_start: u32,
    /// Block number of first free map block
    pub bitmap_start: u32,
    /// Block number of the first swap block; equal to `num_blocks` without swap
    pub swap_start: u32,
}

impl SuperBlock {
    pub fn decode(buf: &[u8; BSIZE]) -> Result<Self> {
        let sb: SuperBlock = bincode::deserialize(buf)?;
        sb.validate()?;
        Ok(sb)
    }

    pub fn encode(&self) -> Result<[u8; BSIZE]> {
        let mut buf = [0; BSIZE];
        let bytes = bincode::serialize(self)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(buf)
    }

    pub fn read(blk_dev: &dyn BlockDevice) -> Result<Self> {
        let mut buf = [0; BSIZE];
        blk_dev
            .read_block(SUPER_BLOCK_NO, &mut buf)
            .map_err(|source| CacheError::Device {
                block_no: SUPER_BLOCK_NO,
                source,
            })?;
        Self::decode(&buf)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != FSMAGIC {
            return Err(CacheError::Format(format!("bad magic {:#x}", self.magic)));
        }
        if self.num_log_blocks < 2 {
            return Err(CacheError::Format(format!(
                "log region of {} blocks has no room for a slot",
                self.num_log_blocks
            )));
        }
        let log_end = self.log_start as u64 + self.num_log_blocks as u64;
        let ordered = (SUPER_BLOCK_NO as u64) < self.log_start as u64
            && log_end <= self.inode_start as u64
            && self.inode_start <= self.bitmap_start
            && self.bitmap_start < self.swap_start
            && self.swap_start <= self.num_blocks;
        if !ordered {
            return Err(CacheError::Format(format!("regions out of order: {self:?}")));
        }
        let bitmap_blocks = (self.num_blocks as usize).div_ceil(BPB);
        if self.bitmap_start as usize + bitmap_blocks > self.swap_start as usize {
            return Err(CacheError::Format("bitmap overlaps swap".to_owned()));
        }
        if (self.num_blocks - self.swap_start) as usize % SWAP_SLOT_BLOCKS != 0 {
            return Err(CacheError::Format(format!(
                "swap area is not a multiple of {SWAP_SLOT_BLOCKS} blocks"
            )));
        }
        Ok(())
    }

    /// bitmap block holding the bit of block `bno`
    pub fn bblock(&self, bno: usize) -> usize {
        self.bitmap_start as usize + bno / BPB
    }

    /// first data block; everything in front of it is metadata
    pub fn data_start(&self) -> usize {
        (self.swap_start - self.num_data_blocks) as usize
    }

    /// block numbers at or past this one are never handed out by the bitmap
    pub fn alloc_limit(&self) -> usize {
        self.swap_start as usize
    }

    /// # of log slots; the header block is part of the log region
    pub fn log_capacity(&self) -> usize {
        (self.num_log_blocks as usize - 1).min(LOG_MAX_SIZE)
    }
}

/// Contents of the header block, used both on disk and in memory to track
/// the block numbers batched into the next commit. Slot `i` lives at
/// `log_start + i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LogHeader {
    block_no: Vec<u32>,
}

impl LogHeader {
    pub fn num_blocks(&self) -> usize {
        self.block_no.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block_no.is_empty()
    }

    pub fn contains(&self, blockno: usize) -> bool {
        self.block_no.iter().any(|&b| b as usize == blockno)
    }

    pub fn push(&mut self, blockno: usize) -> Result<()> {
        let b = u32::try_from(blockno).map_err(|_| CacheError::InvalidBlock(blockno))?;
        self.block_no.push(b);
        Ok(())
    }

    /// target block numbers in slot order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.block_no.iter().map(|&b| b as usize)
    }

    pub fn encode(&self) -> Result<[u8; BSIZE]> {
        assert!(self.num_blocks() <= LOG_MAX_SIZE, "log header: too many blocks");
        let mut buf = [0; BSIZE];
        let bytes = bincode::serialize(self)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(buf)
    }

    /// `header_blockno` is only used to report where a bad header was found.
    pub fn decode(buf: &[u8; BSIZE], capacity: usize, header_blockno: usize) -> Result<Self> {
        let header: LogHeader =
            bincode::deserialize(buf).map_err(|e| CacheError::Corruption {
                block_no: header_blockno,
                detail: format!("unreadable log header: {e}"),
            })?;
        if header.num_blocks() > capacity {
            return Err(CacheError::Corruption {
                block_no: header_blockno,
                detail: format!(
                    "log header lists {} blocks, log holds {capacity}",
                    header.num_blocks()
                ),
            });
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_block_is_an_empty_header() {
        let header = LogHeader::decode(&[0; BSIZE], 10, 2).unwrap();
        assert!(header.is_empty());
    }

    #[test]
    fn full_header_fits_in_one_block() {
        let mut header = LogHeader::default();
        for b in 0..LOG_MAX_SIZE {
            header.push(1000 + b).unwrap();
        }
        let buf = header.encode().unwrap();
        let back = LogHeader::decode(&buf, LOG_MAX_SIZE, 2).unwrap();
        assert_eq!(back.num_blocks(), LOG_MAX_SIZE);
        assert_eq!(back.iter().last(), Some(1000 + LOG_MAX_SIZE - 1));
    }

    #[test]
    fn oversized_header_is_corruption() {
        let mut header = LogHeader::default();
        for b in 0..5 {
            header.push(b).unwrap();
        }
        let buf = header.encode().unwrap();
        assert!(matches!(
            LogHeader::decode(&buf, 4, 2),
            Err(CacheError::Corruption { block_no: 2, .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            SuperBlock::decode(&[0; BSIZE]),
            Err(CacheError::Format(_))
        ));
    }
}

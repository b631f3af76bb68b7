/// block size
pub const BSIZE: usize = 512;

/// block 0 is the boot block, the super block follows it
pub const SUPER_BLOCK_NO: usize = 1;

pub const FSMAGIC: u32 = 0x10203040;

/// max # of blocks any FS op writes
pub const OP_MAX_NUM_BLOCKS: usize = 10;

/// max # of block numbers the log header can describe:
/// an 8-byte length prefix followed by `u32` block numbers
pub const LOG_MAX_SIZE: usize = (BSIZE - std::mem::size_of::<u64>()) / std::mem::size_of::<u32>();

/// resident blocks above which the cache prefers reusing a slot
pub const EVICTION_THRESHOLD: usize = 20;

/// bitmap bits per block
pub const BPB: usize = BSIZE * 8;

/// size of an on-disk inode, only used to reserve the inode region
pub const INODE_SIZE: usize = 64;

/// inodes per block
pub const IPB: usize = BSIZE / INODE_SIZE;

pub const PAGE_SIZE: usize = 4096;

/// blocks backing one swapped-out page
pub const SWAP_SLOT_BLOCKS: usize = PAGE_SIZE / BSIZE;

/// size of file system in blocks
pub const FSSIZE: u32 = 1000;

//! The raw disk underneath the cache: a fixed array of `BSIZE` blocks.

use crate::common::*;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Synchronous block transfers. `buf` is always exactly `BSIZE` bytes.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()>;
    fn num_blocks(&self) -> usize;
}

fn out_of_range(blockno: usize, num_blocks: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("block {blockno} out of range (device has {num_blocks} blocks)"),
    )
}

struct MemDisk {
    bytes: Vec<u8>,
    reads: usize,
    /// block numbers in the order they were written
    writes: Vec<usize>,
    /// writes still allowed before the simulated power cut
    write_budget: Option<usize>,
    bad_reads: HashSet<usize>,
}

/// In-memory disk. Clones share the same storage, so a "remount" is just a
/// new cache over a clone of the device.
#[derive(Clone)]
pub struct MemBlockDevice {
    disk: Arc<Mutex<MemDisk>>,
}

impl MemBlockDevice {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            disk: Arc::new(Mutex::new(MemDisk {
                bytes: vec![0; num_blocks * BSIZE],
                reads: 0,
                writes: Vec::new(),
                write_budget: None,
                bad_reads: HashSet::new(),
            })),
        }
    }

    /// Let `n` more writes through, then fail every write without applying it.
    pub fn crash_after_writes(&self, n: usize) {
        self.disk.lock().write_budget = Some(n);
    }

    /// Make reads of `blockno` fail until [`revive`](Self::revive).
    pub fn fail_reads_of(&self, blockno: usize) {
        self.disk.lock().bad_reads.insert(blockno);
    }

    /// Clear every injected fault.
    pub fn revive(&self) {
        let mut disk = self.disk.lock();
        disk.write_budget = None;
        disk.bad_reads.clear();
    }

    /// Copy of a block as it is on "disk", bypassing any cache.
    pub fn snapshot(&self, blockno: usize) -> [u8; BSIZE] {
        let disk = self.disk.lock();
        let mut out = [0; BSIZE];
        out.copy_from_slice(&disk.bytes[blockno * BSIZE..(blockno + 1) * BSIZE]);
        out
    }

    pub fn reads(&self) -> usize {
        self.disk.lock().reads
    }

    pub fn write_history(&self) -> Vec<usize> {
        self.disk.lock().writes.clone()
    }

    pub fn writes_to(&self, blockno: usize) -> usize {
        self.disk.lock().writes.iter().filter(|&&b| b == blockno).count()
    }

    pub fn clear_history(&self) {
        let mut disk = self.disk.lock();
        disk.reads = 0;
        disk.writes.clear();
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()> {
        let mut disk = self.disk.lock();
        let num_blocks = disk.bytes.len() / BSIZE;
        if blockno >= num_blocks {
            return Err(out_of_range(blockno, num_blocks));
        }
        if disk.bad_reads.contains(&blockno) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read fault"));
        }
        disk.reads += 1;
        buf.copy_from_slice(&disk.bytes[blockno * BSIZE..(blockno + 1) * BSIZE]);
        Ok(())
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()> {
        let mut disk = self.disk.lock();
        let num_blocks = disk.bytes.len() / BSIZE;
        if blockno >= num_blocks {
            return Err(out_of_range(blockno, num_blocks));
        }
        match disk.write_budget {
            Some(0) => return Err(io::Error::new(io::ErrorKind::Other, "device lost power")),
            Some(n) => disk.write_budget = Some(n - 1),
            None => {}
        }
        disk.bytes[blockno * BSIZE..(blockno + 1) * BSIZE].copy_from_slice(buf);
        disk.writes.push(blockno);
        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.disk.lock().bytes.len() / BSIZE
    }
}

/// Disk image in a host file, using positional I/O so no seek position is shared.
pub struct FileBlockDevice {
    file: File,
    num_blocks: usize,
}

impl FileBlockDevice {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        Ok(Self {
            file,
            num_blocks: len / BSIZE,
        })
    }

    /// Create (or truncate) an image of `num_blocks` zeroed blocks.
    pub fn create(path: impl AsRef<Path>, num_blocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((num_blocks * BSIZE) as u64)?;
        Ok(Self { file, num_blocks })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()> {
        if blockno >= self.num_blocks {
            return Err(out_of_range(blockno, self.num_blocks));
        }
        self.file.read_exact_at(buf, (blockno * BSIZE) as u64)
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()> {
        if blockno >= self.num_blocks {
            return Err(out_of_range(blockno, self.num_blocks));
        }
        self.file.write_all_at(buf, (blockno * BSIZE) as u64)?;
        self.file.sync_data()
    }

    fn num_blocks(&self) -> usize {
        self.num_blocks
    }
}

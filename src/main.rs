use blkjournal::common::{BPB, BSIZE, EVICTION_THRESHOLD, OP_MAX_NUM_BLOCKS};
use blkjournal::disk::{LogHeader, SuperBlock};
use blkjournal::mkfs::{self, Geometry};
use blkjournal::{BlockDevice, CacheConfig, FileBlockDevice, Result, Volume};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(version, about = "Format and inspect journaled block images")]
struct Cli {
    /// resident blocks before the cache starts reusing slots
    #[arg(long, default_value_t = EVICTION_THRESHOLD)]
    eviction_threshold: usize,

    /// blocks one operation may dirty
    #[arg(long, default_value_t = OP_MAX_NUM_BLOCKS)]
    op_max_blocks: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh image
    Format {
        image: PathBuf,
        #[arg(long, default_value_t = Geometry::default().num_blocks)]
        blocks: u32,
        #[arg(long, default_value_t = Geometry::default().num_inodes)]
        inodes: u32,
        #[arg(long, default_value_t = Geometry::default().num_log_blocks)]
        log_blocks: u32,
        #[arg(long, default_value_t = Geometry::default().num_swap_blocks)]
        swap_blocks: u32,
    },
    /// Print the super block and any transaction pending in the log, without writing
    Inspect { image: PathBuf },
    /// Mount once, replaying the log, and report the free space
    Recover { image: PathBuf },
    /// Allocate data blocks, one transaction each
    Alloc {
        image: PathBuf,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Free a data block
    Free { image: PathBuf, block_no: usize },
}

fn mount(image: &Path, config: CacheConfig) -> Result<Volume> {
    let blk_dev = Arc::new(FileBlockDevice::open(image)?);
    Volume::mount(blk_dev, config)
}

/// Clear bits below `alloc_limit`, read straight off the device.
fn count_free(blk_dev: &dyn BlockDevice, sb: &SuperBlock) -> Result<usize> {
    let mut buf = [0; BSIZE];
    let mut free = 0;
    for bno in 0..sb.alloc_limit() {
        if bno % BPB == 0 {
            blk_dev.read_block(sb.bblock(bno), &mut buf)?;
        }
        let bj = bno % BPB;
        if buf[bj / 8] & (1 << (bj % 8)) == 0 {
            free += 1;
        }
    }
    Ok(free)
}

fn run(cli: Cli) -> Result<()> {
    let config = CacheConfig {
        eviction_threshold: cli.eviction_threshold,
        op_max_num_blocks: cli.op_max_blocks,
    };
    match cli.command {
        Command::Format {
            image,
            blocks,
            inodes,
            log_blocks,
            swap_blocks,
        } => {
            let geometry = Geometry {
                num_blocks: blocks,
                num_inodes: inodes,
                num_log_blocks: log_blocks,
                num_swap_blocks: swap_blocks,
            };
            let blk_dev = FileBlockDevice::create(&image, blocks as usize)?;
            let sb = mkfs::format(&blk_dev, &geometry)?;
            println!("{sb:#?}");
        }
        Command::Inspect { image } => {
            let blk_dev = FileBlockDevice::open(&image)?;
            let sb = SuperBlock::read(&blk_dev)?;
            println!("{sb:#?}");
            let mut buf = [0; BSIZE];
            let log_start = sb.log_start as usize;
            blk_dev.read_block(log_start, &mut buf)?;
            let header = LogHeader::decode(&buf, sb.log_capacity(), log_start)?;
            if header.is_empty() {
                println!("log: clean");
            } else {
                let blocks: Vec<usize> = header.iter().collect();
                println!("log: {} blocks pending {blocks:?}", header.num_blocks());
            }
            println!(
                "{} of {} data blocks free",
                count_free(&blk_dev, &sb)?,
                sb.num_data_blocks
            );
        }
        Command::Recover { image } => {
            let volume = mount(&image, config)?;
            println!(
                "recovered {} blocks, {} of {} data blocks free",
                volume.log_stats().recovered,
                volume.free_blocks()?,
                volume.super_blk().num_data_blocks
            );
        }
        Command::Alloc { image, count } => {
            let volume = mount(&image, config)?;
            for _ in 0..count {
                let mut ctx = volume.begin_op()?;
                let bno = volume.alloc(&mut ctx);
                volume.end_op(ctx)?;
                println!("{}", bno?);
            }
        }
        Command::Free { image, block_no } => {
            let volume = mount(&image, config)?;
            let mut ctx = volume.begin_op()?;
            let freed = volume.free(&mut ctx, block_no);
            volume.end_op(ctx)?;
            freed?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("blkjournal: {e}");
            ExitCode::FAILURE
        }
    }
}

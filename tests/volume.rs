use blkjournal::common::{BSIZE, PAGE_SIZE};
use blkjournal::mkfs::{self, Geometry};
use blkjournal::{BlockDevice, CacheConfig, CacheError, FileBlockDevice, MemBlockDevice, Volume};

use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 100 blocks: log at 2..18, inodes at 18, bitmap at 19, data 20..100, no swap
fn tiny() -> Geometry {
    Geometry {
        num_blocks: 100,
        num_inodes: 8,
        num_log_blocks: 16,
        num_swap_blocks: 0,
    }
}

fn formatted(geometry: &Geometry) -> MemBlockDevice {
    init_logger();
    let dev = MemBlockDevice::new(geometry.num_blocks as usize);
    mkfs::format(&dev, geometry).unwrap();
    dev
}

fn mount(dev: &MemBlockDevice) -> Volume {
    Volume::mount(Arc::new(dev.clone()), CacheConfig::default()).unwrap()
}

fn alloc_one(volume: &Volume) -> usize {
    let mut ctx = volume.begin_op().unwrap();
    let bno = volume.alloc(&mut ctx).unwrap();
    volume.end_op(ctx).unwrap();
    bno
}


#[test]
fn first_allocation_is_first_data_block() {
    let dev = formatted(&tiny());
    let volume = mount(&dev);
    assert_eq!(volume.super_blk().data_start(), 20);
    assert_eq!(volume.free_blocks().unwrap(), 80);
    assert_eq!(alloc_one(&volume), 20);
    assert_eq!(alloc_one(&volume), 21);
    assert_eq!(volume.free_blocks().unwrap(), 78);
}

#[test]
fn freed_block_comes_back_zeroed() {
    let dev = formatted(&tiny());
    let volume = mount(&dev);
    let bno = alloc_one(&volume);

    let mut ctx = volume.begin_op().unwrap();
    let mut bp = volume.acquire(bno).unwrap();
    bp.data_mut().fill(0x5a);
    volume.sync(Some(&mut ctx), &bp).unwrap();
    volume.release(bp);
    volume.end_op(ctx).unwrap();
    assert_eq!(dev.snapshot(bno), [0x5a; BSIZE]);

    let mut ctx = volume.begin_op().unwrap();
    volume.free(&mut ctx, bno).unwrap();
    volume.end_op(ctx).unwrap();

    assert_eq!(alloc_one(&volume), bno);
    assert_eq!(dev.snapshot(bno), [0; BSIZE]);
    let bp = volume.acquire(bno).unwrap();
    assert_eq!(bp.data(), &[0; BSIZE]);
}

#[test]
fn full_volume_reports_out_of_space() {
    let dev = formatted(&tiny());
    let volume = mount(&dev);
    let mut got = Vec::new();
    for _ in 0..20 {
        let mut ctx = volume.begin_op().unwrap();
        for _ in 0..4 {
            got.push(volume.alloc(&mut ctx).unwrap());
        }
        volume.end_op(ctx).unwrap();
    }
    assert_eq!(got, (20..100).collect::<Vec<_>>());

    let mut ctx = volume.begin_op().unwrap();
    assert!(matches!(volume.alloc(&mut ctx), Err(CacheError::OutOfSpace)));
    volume.end_op(ctx).unwrap();
    assert_eq!(volume.free_blocks().unwrap(), 0);
}

#[test]
fn blocks_outside_the_volume_are_rejected() {
    let dev = formatted(&tiny());
    let volume = mount(&dev);
    assert!(matches!(volume.acquire(100), Err(CacheError::InvalidBlock(100))));

    let mut ctx = volume.begin_op().unwrap();
    assert!(matches!(volume.free(&mut ctx, 100), Err(CacheError::InvalidBlock(100))));
    volume.end_op(ctx).unwrap();
}

#[test]
fn metadata_blocks_cannot_be_freed() {
    let dev = formatted(&tiny());
    {
        let volume = mount(&dev);
        let mut ctx = volume.begin_op().unwrap();
        // super block and bitmap block
        for bno in [1, 19] {
            assert!(matches!(
                volume.free(&mut ctx, bno),
                Err(CacheError::InvalidBlock(b)) if b == bno
            ));
        }
        assert_eq!(volume.alloc(&mut ctx).unwrap(), 20);
        volume.end_op(ctx).unwrap();
    }
    let volume = mount(&dev);
    assert_eq!(volume.free_blocks().unwrap(), 79);
}

#[test]
fn operation_larger_than_log_is_refused_at_mount() {
    let dev = formatted(&tiny());
    let config = CacheConfig {
        op_max_num_blocks: 16,
        ..CacheConfig::default()
    };
    assert!(matches!(
        Volume::mount(Arc::new(dev.clone()), config),
        Err(CacheError::InvalidConfig(_))
    ));
}

#[test]
fn unformatted_device_does_not_mount() {
    init_logger();
    let dev = MemBlockDevice::new(100);
    assert!(matches!(
        Volume::mount(Arc::new(dev), CacheConfig::default()),
        Err(CacheError::Format(_))
    ));
}

#[test]
fn committed_allocation_survives_crash() {
    let dev = formatted(&tiny());
    {
        let volume = mount(&dev);
        // two log slots and the header reach the disk, installation does not
        dev.crash_after_writes(3);
        let mut ctx = volume.begin_op().unwrap();
        assert_eq!(volume.alloc(&mut ctx).unwrap(), 20);
        assert!(matches!(volume.end_op(ctx), Err(CacheError::Device { .. })));
        assert!(matches!(volume.begin_op(), Err(CacheError::Poisoned)));
    }
    dev.revive();

    let volume = mount(&dev);
    assert_eq!(volume.log_stats().recovered, 2);
    assert_eq!(volume.free_blocks().unwrap(), 79);
    assert_eq!(alloc_one(&volume), 21);
}

#[test]
fn uncommitted_allocation_is_lost_in_crash() {
    let dev = formatted(&tiny());
    {
        let volume = mount(&dev);
        // the header write fails
        dev.crash_after_writes(2);
        let mut ctx = volume.begin_op().unwrap();
        volume.alloc(&mut ctx).unwrap();
        assert!(volume.end_op(ctx).is_err());
    }
    dev.revive();

    let volume = mount(&dev);
    assert_eq!(volume.log_stats().recovered, 0);
    assert_eq!(volume.free_blocks().unwrap(), 80);
    assert_eq!(alloc_one(&volume), 20);
}

#[test]
fn pages_round_trip_through_swap() {
    let dev = formatted(&Geometry::default());
    let volume = mount(&dev);
    let swap_start = volume.super_blk().swap_start as usize;

    let mut page = [0; PAGE_SIZE];
    for (i, b) in page.iter_mut().enumerate() {
        *b = (i / BSIZE) as u8 + 1;
    }
    let bno = volume.swap_out(&page).unwrap();
    assert_eq!(bno, swap_start);
    // written through, not logged
    assert_eq!(dev.snapshot(bno + 7), [8; BSIZE]);
    assert_eq!(volume.log_stats().commits, 0);

    let mut back = [0; PAGE_SIZE];
    volume.swap_in(bno, &mut back).unwrap();
    assert_eq!(back, page);

    let others: Vec<usize> = (0..7).map(|_| volume.swap_out(&page).unwrap()).collect();
    assert_eq!(others.last(), Some(&(swap_start + 7 * 8)));
    assert!(matches!(volume.swap_out(&page), Err(CacheError::OutOfSpace)));

    volume.release_swap(bno);
    assert_eq!(volume.swap_out(&page).unwrap(), bno);
}

#[test]
fn image_file_keeps_allocations_across_mounts() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");
    let geometry = tiny();
    {
        let blk_dev = FileBlockDevice::create(&path, geometry.num_blocks as usize).unwrap();
        mkfs::format(&blk_dev, &geometry).unwrap();
    }
    {
        let blk_dev = Arc::new(FileBlockDevice::open(&path).unwrap());
        assert_eq!(blk_dev.num_blocks(), 100);
        let volume = Volume::mount(blk_dev, CacheConfig::default()).unwrap();
        assert_eq!(alloc_one(&volume), 20);
        assert_eq!(alloc_one(&volume), 21);
    }
    let blk_dev = Arc::new(FileBlockDevice::open(&path).unwrap());
    let volume = Volume::mount(blk_dev, CacheConfig::default()).unwrap();
    assert_eq!(volume.log_stats().recovered, 0);
    assert_eq!(volume.free_blocks().unwrap(), 78);
    assert_eq!(alloc_one(&volume), 22);
}

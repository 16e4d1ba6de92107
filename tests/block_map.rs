mod common;

use common::{fine_grained_fs, small_fs};
use sgfs::fs::{block_map::BlockLevel, inode::FileType};
use sgfs::{BlockDevice, FileSystemError, Resource};

// block size 512 -> 128 pointers per block
const P: u64 = 128;
const MAX: u64 = 12 + P + P * P;

#[test]
fn locate_levels() {
    let (_, fs) = fine_grained_fs();
    let map = fs.block_map();
    assert_eq!(map.pointers_per_block(), P);
    assert_eq!(map.max_blocks(), MAX);

    assert_eq!(map.locate(0).unwrap(), BlockLevel::Direct(0));
    assert_eq!(map.locate(11).unwrap(), BlockLevel::Direct(11));
    assert_eq!(map.locate(12).unwrap(), BlockLevel::Indirect(0));
    assert_eq!(map.locate(12 + P - 1).unwrap(), BlockLevel::Indirect(P - 1));
    assert_eq!(map.locate(12 + P).unwrap(), BlockLevel::DoubleIndirect(0, 0));
    assert_eq!(map.locate(12 + 2 * P).unwrap(), BlockLevel::DoubleIndirect(1, 0));
    assert_eq!(map.locate(MAX - 1).unwrap(), BlockLevel::DoubleIndirect(P - 1, P - 1));
    assert!(matches!(
        map.locate(MAX),
        Err(FileSystemError::FileTooLarge { index, max }) if index == MAX && max == MAX
    ));
}

#[test]
fn empty_inode_is_all_holes() {
    let (_, mut fs) = fine_grained_fs();
    let inode = fs.alloc_inode(FileType::Regular).unwrap();
    for logical in [0, 11, 12, 12 + P - 1, 12 + P, MAX - 1] {
        assert_eq!(fs.logical_to_physical(&inode, logical).unwrap(), None);
    }
    assert!(matches!(
        fs.logical_to_physical(&inode, MAX),
        Err(FileSystemError::FileTooLarge { .. })
    ));
}

#[test]
fn map_boundaries() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    let free = fs.super_block().free_blocks;

    let mut mapped = Vec::new();
    for logical in [0, 11, 12, 12 + P - 1, 12 + P, MAX - 1] {
        let block = fs.map_block(0, logical).unwrap();
        mapped.push((logical, block));
    }

    // mapping again returns the same block without allocating
    let used = free - fs.super_block().free_blocks;
    for &(logical, block) in &mapped {
        assert_eq!(fs.map_block(0, logical).unwrap(), block);
    }
    assert_eq!(free - fs.super_block().free_blocks, used);

    // 6 data blocks, 1 indirect table, 1 double-indirect table, 2 second-level tables
    assert_eq!(used, 10);

    let inode = fs.read_inode(0).unwrap();
    assert_ne!(inode.indirect_block, 0);
    assert_ne!(inode.double_indirect_block, 0);
    for &(logical, block) in &mapped {
        assert_eq!(fs.logical_to_physical(&inode, logical).unwrap(), Some(block));
    }
    assert_eq!(fs.logical_to_physical(&inode, 13).unwrap(), None);
    assert_eq!(fs.logical_to_physical(&inode, 12 + P + 1).unwrap(), None);

    let report = fs.check().unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
    assert_eq!(report.blocks_referenced, 10);
}

#[test]
fn map_past_the_end() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    let free = fs.super_block().free_blocks;
    assert!(matches!(
        fs.map_block(0, MAX),
        Err(FileSystemError::FileTooLarge { .. })
    ));
    assert_eq!(fs.super_block().free_blocks, free);
}

#[test]
fn map_requires_live_inode() {
    let (_, mut fs) = fine_grained_fs();
    assert!(matches!(
        fs.map_block(3, 0),
        Err(FileSystemError::InvalidInode(3))
    ));
}

#[test]
fn new_pointer_tables_are_zeroed() {
    let (disk, mut fs) = small_fs();
    // dirty every data block first
    let data = fs.super_block().data_block_start as u64;
    for b in data..256 {
        disk.write_at(b * 4096, &[0xEE; 4096]).unwrap();
    }

    fs.alloc_inode(FileType::Regular).unwrap();
    fs.map_block(0, 12).unwrap();
    let inode = fs.read_inode(0).unwrap();
    for logical in 13..40 {
        assert_eq!(fs.logical_to_physical(&inode, logical).unwrap(), None);
    }
}

#[test]
fn out_of_region_pointer() {
    let (_, mut fs) = small_fs();
    let mut inode = fs.alloc_inode(FileType::Regular).unwrap();
    inode.direct_blocks[2] = 5;
    inode.direct_blocks[3] = 999;
    assert!(matches!(
        fs.logical_to_physical(&inode, 2),
        Err(FileSystemError::OutOfRange { resource: Resource::Block, index: 5, .. })
    ));
    assert!(fs.logical_to_physical(&inode, 3).is_err());
}

#[test]
fn truncate_to_zero_restores_counters() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    let free = fs.super_block().free_blocks;

    for logical in [0, 11, 12, 12 + P - 1, 12 + P, 12 + 3 * P + 7, MAX - 1] {
        fs.map_block(0, logical).unwrap();
    }
    assert!(fs.super_block().free_blocks < free);

    fs.truncate(0, 0).unwrap();
    assert_eq!(fs.super_block().free_blocks, free);

    let inode = fs.read_inode(0).unwrap();
    assert_eq!(inode.file_size, 0);
    assert_eq!(inode.direct_blocks, [0; 12]);
    assert_eq!(inode.indirect_block, 0);
    assert_eq!(inode.double_indirect_block, 0);
    assert!(fs.check().unwrap().is_clean());
}

#[test]
fn truncate_keeps_the_prefix() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    let free = fs.super_block().free_blocks;

    let blocks: Vec<u32> = (0..20).map(|l| fs.map_block(0, l).unwrap()).collect();
    // 20 data blocks + the indirect table
    assert_eq!(free - fs.super_block().free_blocks, 21);

    // 15 blocks of 512 bytes, last one partial
    fs.truncate(0, 14 * 512 + 1).unwrap();
    assert_eq!(free - fs.super_block().free_blocks, 16);

    let inode = fs.read_inode(0).unwrap();
    assert_eq!(inode.file_size, 14 * 512 + 1);
    for l in 0..15 {
        assert_eq!(fs.logical_to_physical(&inode, l).unwrap(), Some(blocks[l as usize]));
    }
    for l in 15..20 {
        assert_eq!(fs.logical_to_physical(&inode, l).unwrap(), None);
    }

    // down to the direct pointers drops the indirect table too
    fs.truncate(0, 12 * 512).unwrap();
    let inode = fs.read_inode(0).unwrap();
    assert_eq!(inode.indirect_block, 0);
    assert_eq!(free - fs.super_block().free_blocks, 12);
    assert!(fs.check().unwrap().is_clean());
}

#[test]
fn truncate_inside_double_indirect() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();

    let first = 12 + P;
    let a = fs.map_block(0, first).unwrap();
    fs.map_block(0, first + P).unwrap();
    fs.map_block(0, first + 2 * P + 5).unwrap();
    let free = fs.super_block().free_blocks;

    // keep only the first double-indirect block
    fs.truncate(0, ((first + 1) * 512) as u32).unwrap();
    // two data blocks and their two second-level tables
    assert_eq!(fs.super_block().free_blocks, free + 4);

    let inode = fs.read_inode(0).unwrap();
    assert_ne!(inode.double_indirect_block, 0);
    assert_eq!(fs.logical_to_physical(&inode, first).unwrap(), Some(a));
    assert_eq!(fs.logical_to_physical(&inode, first + P).unwrap(), None);
    assert!(fs.check().unwrap().is_clean());
}

#[test]
fn truncate_past_the_end() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    assert!(matches!(
        fs.truncate(0, u32::MAX),
        Err(FileSystemError::FileTooLarge { .. })
    ));
}

#[test]
fn freeing_an_inode_releases_its_blocks() {
    let (_, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    let free = fs.super_block().free_blocks;
    for logical in [1, 30, 500] {
        fs.map_block(0, logical).unwrap();
    }
    fs.free_inode(0).unwrap();
    assert_eq!(fs.super_block().free_blocks, free);
    assert_eq!(fs.super_block().free_inodes, fs.super_block().total_inodes);
    assert!(fs.read_inode(0).unwrap().is_free());
}

#[test]
fn exhausting_blocks_mid_map() {
    let (_, mut fs) = small_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    // leave exactly one free data block
    while fs.super_block().free_blocks > 255 - 37 {
        fs.alloc_block().unwrap();
    }
    // the indirect table takes the last block, the data block cannot be found
    assert!(matches!(
        fs.map_block(0, 12),
        Err(FileSystemError::Exhausted(Resource::Block))
    ));
    let inode = fs.read_inode(0).unwrap();
    assert_ne!(inode.indirect_block, 0);
    assert!(fs.check().unwrap().is_clean());
}

fn stray_problems(fs: &sgfs::FileSystem<sgfs::RamDisk>) -> Vec<String> {
    let report = fs.check().unwrap();
    log!("{:?}", report.problems);
    report.problems
}

#[test]
fn truncate_stops_cleanly_at_a_stray_indirect_entry() {
    let (disk, mut fs) = small_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    fs.map_block(0, 12).unwrap();
    let data = fs.map_block(0, 13).unwrap();
    let table = fs.read_inode(0).unwrap().indirect_block;
    disk.write_at(table as u64 * 4096, &5u32.to_le_bytes()).unwrap();

    assert!(matches!(
        fs.truncate(0, 0),
        Err(FileSystemError::OutOfRange { resource: Resource::Block, index: 5, .. })
    ));

    // the freed block is no longer reachable from the table
    let inode = fs.read_inode(0).unwrap();
    assert_eq!(fs.logical_to_physical(&inode, 13).unwrap(), None);
    assert!(!fs.block_bitmap().is_allocated(data as u64).unwrap());

    // handing it out again must not alias a mapped block
    assert_eq!(fs.alloc_block().unwrap(), data);
    let problems = stray_problems(&fs);
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("outside the data area"));
}

#[test]
fn truncate_stops_cleanly_inside_double_indirect() {
    let (disk, mut fs) = fine_grained_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    let first = 12 + P;
    fs.map_block(0, first).unwrap();
    fs.map_block(0, first + P).unwrap();

    // stray pointer in the first second-level table
    let top = fs.read_inode(0).unwrap().double_indirect_block;
    let mut raw = [0u8; 4];
    disk.read_at(top as u64 * 512, &mut raw).unwrap();
    let mid = u32::from_le_bytes(raw);
    disk.write_at(mid as u64 * 512 + 4, &5u32.to_le_bytes()).unwrap();

    assert!(fs.truncate(0, 0).is_err());

    // the second subtree was released and unlinked from the top table
    let inode = fs.read_inode(0).unwrap();
    assert_eq!(fs.logical_to_physical(&inode, first + P).unwrap(), None);
    let problems = stray_problems(&fs);
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("outside the data area"));

    let on_disk = sgfs::fs::super_block::SuperBlock::load(&disk).unwrap();
    assert_eq!(on_disk.free_blocks, fs.super_block().free_blocks);
}

#[test]
fn free_inode_keeps_pointers_consistent_on_error() {
    let (disk, mut fs) = small_fs();
    fs.alloc_inode(FileType::Regular).unwrap();
    fs.map_block(0, 0).unwrap();
    let second = fs.map_block(0, 1).unwrap();

    let mut inode = fs.read_inode(0).unwrap();
    inode.direct_blocks[0] = 5;
    fs.write_inode(0, &inode).unwrap();

    assert!(matches!(
        fs.free_inode(0),
        Err(FileSystemError::OutOfRange { index: 5, .. })
    ));

    // the slot stays live, the released pointer is gone on disk
    assert!(fs.inode_bitmap().is_allocated(0).unwrap());
    let inode = fs.read_inode(0).unwrap();
    assert_eq!(inode.direct_blocks[1], 0);
    assert!(!fs.block_bitmap().is_allocated(second as u64).unwrap());
    assert_eq!(stray_problems(&fs).len(), 1);

    let on_disk = sgfs::fs::super_block::SuperBlock::load(&disk).unwrap();
    assert_eq!(on_disk.free_blocks, fs.super_block().free_blocks);
}

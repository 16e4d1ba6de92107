//! 布局计算：设备大小 + 块大小 → 各区域的起始块号。
//!
//! 区域依次排列，每个区域的大小决定下一个区域的起点：
//!
//! ```text
//! journal_start      = 1
//! block_bitmap_start = journal_start + JOURNAL_BLOCKS
//! inode_bitmap_start = block_bitmap_start + ceil(total_blocks / 8)
//! inode_table_start  = inode_bitmap_start + ceil(total_blocks / 8)   // 或 ceil(total_inodes / 8)
//! data_block_start   = inode_table_start + total_inodes              // 每个 inode 占一块
//! ```

use crate::fs::{
    config::{
        FormatOptions, InodeBitmapSizing, INODE_RATIO, JOURNAL_BLOCKS, JOURNAL_START_BLOCK_ID,
        MIN_BLOCK_SIZE, SGFS_MAGIC, SGFS_VERSION,
    },
    error::{FileSystemError, Result},
    inode::INODE_RECORD_SIZE,
    super_block::SuperBlock,
};

/// 位图区域的块数：每项一位，按字节数向上取整后作为块数
pub fn bitmap_region_blocks(items: u64) -> u64 {
    items.div_ceil(8)
}

/// 计算一个全新卷的超级块
pub fn compute_geometry(device_size_bytes: u64, options: &FormatOptions) -> Result<SuperBlock> {
    let block_size = options.block_size;
    if block_size < MIN_BLOCK_SIZE || !block_size.is_power_of_two() {
        return Err(FileSystemError::InvalidGeometry(format!(
            "block size {} must be a power of two and at least {}",
            block_size, MIN_BLOCK_SIZE
        )));
    }

    let total_blocks = device_size_bytes / block_size as u64;
    if total_blocks > u32::MAX as u64 {
        return Err(FileSystemError::InvalidGeometry(format!(
            "{} blocks do not fit in 32-bit block numbers",
            total_blocks
        )));
    }
    // 策略值，不是区域大小，所以向下取整
    let total_inodes = total_blocks / INODE_RATIO as u64;
    if total_inodes == 0 {
        return Err(FileSystemError::InvalidGeometry(format!(
            "{} bytes at block size {} leave no room for a single inode",
            device_size_bytes, block_size
        )));
    }

    let journal_start = JOURNAL_START_BLOCK_ID as u64;
    let journal_size = JOURNAL_BLOCKS as u64;
    let block_bitmap_start = journal_start + journal_size;
    let inode_bitmap_start = block_bitmap_start + bitmap_region_blocks(total_blocks);
    let inode_bitmap_blocks = match options.inode_bitmap_sizing {
        InodeBitmapSizing::BlockCount => bitmap_region_blocks(total_blocks),
        InodeBitmapSizing::InodeCount => bitmap_region_blocks(total_inodes),
    };
    let inode_table_start = inode_bitmap_start + inode_bitmap_blocks;
    let data_block_start = inode_table_start + total_inodes;

    // 至少要留下一个数据块
    if data_block_start >= total_blocks {
        return Err(FileSystemError::InvalidGeometry(format!(
            "metadata needs {} blocks but the device only has {} blocks of {} bytes",
            data_block_start + 1,
            total_blocks,
            block_size
        )));
    }

    // 上面已保证所有值都小于 total_blocks <= u32::MAX
    Ok(SuperBlock {
        magic: SGFS_MAGIC,
        version: SGFS_VERSION,
        block_size,
        inode_size: INODE_RECORD_SIZE,
        total_blocks: total_blocks as u32,
        total_inodes: total_inodes as u32,
        free_blocks: total_blocks as u32 - 1, // 超级块占 1 块
        free_inodes: total_inodes as u32,
        journal_start: journal_start as u32,
        block_bitmap_start: block_bitmap_start as u32,
        inode_bitmap_start: inode_bitmap_start as u32,
        inode_table_start: inode_table_start as u32,
        data_block_start: data_block_start as u32,
        journal_size: journal_size as u32,
    })
}

use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};

use crate::{
    disk::BlockDevice,
    fs::{
        config::{MIN_BLOCK_SIZE, SGFS_MAGIC, SGFS_VERSION, SUPER_BLOCK_BLOCK_ID},
        error::{FileSystemError, Result},
        inode::INODE_RECORD_SIZE,
    },
};

/// 超级块记录的编码长度：14 个小端 u32
pub const SUPER_BLOCK_RECORD_SIZE: usize = 14 * 4;

/// 超级块。字段顺序即磁盘上的顺序，用 bincode 默认配置（定长整数、小端）编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub magic: u32,   // 魔数，用于识别文件系统
    pub version: u32, // 格式版本
    /** 单元大小 */
    pub block_size: u32, // 每块大小（字节）
    pub inode_size: u32, // 每个 inode 记录大小（字节）
    /** 容量与空闲计数 */
    pub total_blocks: u32, // 卷内总块数
    pub total_inodes: u32, // 总 inode 数
    pub free_blocks: u32,  // 当前空闲块数，必须等于块位图中的 0 位数
    pub free_inodes: u32,  // 当前空闲 inode 数，必须等于 inode 位图中的 0 位数
    /** 区域起始块号 */
    pub journal_start: u32,
    pub block_bitmap_start: u32,
    pub inode_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_block_start: u32,
    pub journal_size: u32, // 日志区块数
}

/// 卷上的结构区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    SuperBlock,
    Journal,
    BlockBitmap,
    InodeBitmap,
    InodeTable,
    Data,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SuperBlock => "superblock",
            Self::Journal => "journal",
            Self::BlockBitmap => "block bitmap",
            Self::InodeBitmap => "inode bitmap",
            Self::InodeTable => "inode table",
            Self::Data => "data",
        };
        f.pad(name)
    }
}

fn corrupt(msg: impl Into<String>) -> FileSystemError {
    FileSystemError::CorruptSuperblock(msg.into())
}

impl SuperBlock {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| FileSystemError::Corrupted(e.to_string()))
    }

    /// 只读取 `bytes` 开头的定长记录，后面的内容忽略
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SUPER_BLOCK_RECORD_SIZE {
            return Err(corrupt(format!(
                "record needs {} bytes, got {}",
                SUPER_BLOCK_RECORD_SIZE,
                bytes.len()
            )));
        }

        let sb: SuperBlock = bincode::deserialize(&bytes[..SUPER_BLOCK_RECORD_SIZE])
            .map_err(|e| corrupt(e.to_string()))?;

        if sb.magic != SGFS_MAGIC {
            return Err(corrupt(format!("bad magic {:#010x}", sb.magic)));
        }
        if sb.version != SGFS_VERSION {
            return Err(corrupt(format!("unsupported version {}", sb.version)));
        }
        sb.validate()?;
        Ok(sb)
    }

    /// 检查布局自洽：区域首尾相接且严格递增，计数不超过容量
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || self.block_size < MIN_BLOCK_SIZE {
            return Err(corrupt(format!("bad block size {}", self.block_size)));
        }
        if self.inode_size < INODE_RECORD_SIZE || self.inode_size > self.block_size {
            return Err(corrupt(format!("bad inode size {}", self.inode_size)));
        }
        if self.journal_start <= SUPER_BLOCK_BLOCK_ID
            || self.journal_start.checked_add(self.journal_size) != Some(self.block_bitmap_start)
        {
            return Err(corrupt("journal region is misplaced"));
        }
        if !(self.block_bitmap_start < self.inode_bitmap_start
            && self.inode_bitmap_start < self.inode_table_start
            && self.inode_table_start < self.data_block_start
            && self.data_block_start < self.total_blocks)
        {
            return Err(corrupt("region starts are not strictly increasing"));
        }
        let bits_per_block = self.block_size as u64 * 8;
        if (self.block_bitmap_blocks() as u64) * bits_per_block < self.total_blocks as u64 {
            return Err(corrupt(format!(
                "{}-block bitmap cannot hold {} blocks",
                self.block_bitmap_blocks(),
                self.total_blocks
            )));
        }
        if (self.inode_bitmap_blocks() as u64) * bits_per_block < self.total_inodes as u64 {
            return Err(corrupt(format!(
                "{}-block inode bitmap cannot hold {} inodes",
                self.inode_bitmap_blocks(),
                self.total_inodes
            )));
        }
        if self.inode_table_start.checked_add(self.total_inodes) != Some(self.data_block_start) {
            return Err(corrupt("inode table size disagrees with total_inodes"));
        }
        if self.free_blocks > self.total_blocks || self.free_inodes > self.total_inodes {
            return Err(corrupt("free counters exceed capacity"));
        }
        Ok(())
    }

    pub fn load<D: BlockDevice + ?Sized>(disk: &D) -> Result<Self> {
        let mut record = [0u8; SUPER_BLOCK_RECORD_SIZE];
        disk.read_at(0, &mut record)?;
        Self::decode(&record)
    }

    /// 写回第 0 块，记录之后补零
    pub fn sync<D: BlockDevice + ?Sized>(&self, disk: &D) -> Result<()> {
        let mut block = vec![0u8; self.block_size as usize];
        let record = self.encode()?;
        block[..record.len()].copy_from_slice(&record);
        disk.write_block(SUPER_BLOCK_BLOCK_ID as u64, &block)?;
        Ok(())
    }

    pub fn block_bitmap_blocks(&self) -> u32 {
        self.inode_bitmap_start - self.block_bitmap_start
    }

    pub fn inode_bitmap_blocks(&self) -> u32 {
        self.inode_table_start - self.inode_bitmap_start
    }

    pub fn data_blocks(&self) -> u32 {
        self.total_blocks - self.data_block_start
    }

    /// 每个间接块能放多少个块指针
    pub fn pointers_per_block(&self) -> u32 {
        self.block_size / crate::fs::config::POINTER_SIZE
    }

    /// 六个区域及各自的块号范围，按磁盘顺序排列
    pub fn regions(&self) -> [(Region, Range<u32>); 6] {
        [
            (Region::SuperBlock, SUPER_BLOCK_BLOCK_ID..self.journal_start),
            (Region::Journal, self.journal_start..self.block_bitmap_start),
            (Region::BlockBitmap, self.block_bitmap_start..self.inode_bitmap_start),
            (Region::InodeBitmap, self.inode_bitmap_start..self.inode_table_start),
            (Region::InodeTable, self.inode_table_start..self.data_block_start),
            (Region::Data, self.data_block_start..self.total_blocks),
        ]
    }
}

/// "SGFS"
pub const SGFS_MAGIC: u32 = 0x5347_4653;
pub const SGFS_VERSION: u32 = 1;

/// 超级块固定在卷的第 0 块
pub const SUPER_BLOCK_BLOCK_ID: u32 = 0;

// 日志区紧跟超级块，大小固定（只保留，不读写）
pub const JOURNAL_START_BLOCK_ID: u32 = 1;
pub const JOURNAL_BLOCKS: u32 = 128;

/// total_inodes = total_blocks / INODE_RATIO
pub const INODE_RATIO: u32 = 10;

pub const DIRECT_PTRS: usize = 12;

/// 块指针宽度（u32）
pub const POINTER_SIZE: u32 = 4;

pub const MIN_BLOCK_SIZE: u32 = 512;
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// inode 位图区的大小按什么计算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InodeBitmapSizing {
    /// ceil(total_blocks / 8) 块，与已有镜像逐字节兼容
    #[default]
    BlockCount,
    /// ceil(total_inodes / 8) 块
    InodeCount,
}

/// 重复释放时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoubleFreePolicy {
    #[default]
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub block_size: u32,
    pub inode_bitmap_sizing: InodeBitmapSizing,
    pub double_free: DoubleFreePolicy,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            inode_bitmap_sizing: InodeBitmapSizing::default(),
            double_free: DoubleFreePolicy::default(),
        }
    }
}

impl FormatOptions {
    pub fn with_block_size(block_size: u32) -> Self {
        Self {
            block_size,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountOptions {
    pub double_free: DoubleFreePolicy,
}

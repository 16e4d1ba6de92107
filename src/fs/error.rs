use std::fmt;

use thiserror::Error;

/// 位图管理的两类资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Block,
    Inode,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Inode => write!(f, "inode"),
        }
    }
}

/// 文件系统错误类型
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// 设备容纳不下所请求块大小下的元数据区
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// 超级块魔数 / 版本不对，或布局自相矛盾
    #[error("Corrupt superblock: {0}")]
    CorruptSuperblock(String),

    #[error("Invalid partition table: {0}")]
    InvalidPartitionTable(String),

    #[error("No free {0} available")]
    Exhausted(Resource),

    #[error("Double free of {resource} {index}")]
    DoubleFree { resource: Resource, index: u64 },

    #[error("{resource} {index} is out of range (capacity {capacity})")]
    OutOfRange {
        resource: Resource,
        index: u64,
        capacity: u64,
    },

    /// 槽位上没有已分配的 inode
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// 逻辑块号超出了二级间接寻址的上限
    #[error("Logical block {index} exceeds the addressable maximum of {max} blocks")]
    FileTooLarge { index: u64, max: u64 },

    /// 磁盘上的 inode 记录无法解码
    #[error("File system corrupted: {0}")]
    Corrupted(String),

    #[error("Disk I/O error: {0}")]
    DeviceIo(#[from] std::io::Error),
}

/// 文件系统统一结果类型
pub type Result<T> = std::result::Result<T, FileSystemError>;

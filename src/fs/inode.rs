use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    fs::{
        config::DIRECT_PTRS,
        error::{FileSystemError, Result},
    },
    utils::current_timestamp,
};

/// inode 记录的编码长度（字节）
pub const INODE_RECORD_SIZE: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum FileType {
    Unallocated, // 空闲槽位
    Regular,     // 普通文件
    Directory,   // 目录
}

impl From<FileType> for u16 {
    fn from(t: FileType) -> u16 {
        match t {
            FileType::Unallocated => 0,
            FileType::Regular => 1,
            FileType::Directory => 2,
        }
    }
}

impl TryFrom<u16> for FileType {
    type Error = String;

    fn try_from(raw: u16) -> std::result::Result<Self, String> {
        match raw {
            0 => Ok(Self::Unallocated),
            1 => Ok(Self::Regular),
            2 => Ok(Self::Directory),
            other => Err(format!("unknown file type {}", other)),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unallocated => "free",
            Self::Regular => "file",
            Self::Directory => "dir",
        };
        f.pad(name)
    }
}

bitflags! {
    /// Unix 风格权限位（只记录，不检查）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Permissions: u16 {
        const OWNER_READ  = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXEC  = 0o100;
        const GROUP_READ  = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXEC  = 0o010;
        const OTHER_READ  = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXEC  = 0o001;
    }
}

impl Permissions {
    /// 0o644
    pub fn default_file() -> Self {
        Self::OWNER_READ | Self::OWNER_WRITE | Self::GROUP_READ | Self::OTHER_READ
    }

    /// 0o755
    pub fn default_dir() -> Self {
        Self::default_file() | Self::OWNER_EXEC | Self::GROUP_EXEC | Self::OTHER_EXEC
    }
}

/// 磁盘上的 inode 记录，80 字节，小端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub inode_number: u32,     // 槽位号 + 1，0 表示空闲
    pub file_size: u32,        // 文件大小（字节）
    pub file_type: FileType,   // 文件类型
    pub permissions: Permissions,

    // 块索引区
    pub direct_blocks: [u32; DIRECT_PTRS], // 直接块指针
    pub indirect_block: u32,               // 一级间接块
    pub double_indirect_block: u32,        // 二级间接块

    pub creation_time: u32,
    pub modification_time: u32,
    pub access_time: u32,
}

impl Inode {
    /// 新分配的 inode：`slot` 为 inode 表中的位置
    pub fn new(slot: u32, file_type: FileType) -> Self {
        let now = current_timestamp();
        let permissions = match file_type {
            FileType::Directory => Permissions::default_dir(),
            _ => Permissions::default_file(),
        };

        Self {
            inode_number: slot + 1,
            file_type,
            permissions,
            creation_time: now,
            modification_time: now,
            access_time: now,
            ..Self::empty()
        }
    }

    /// 全零记录
    pub fn empty() -> Self {
        Self {
            inode_number: 0,
            file_size: 0,
            file_type: FileType::Unallocated,
            permissions: Permissions::empty(),
            direct_blocks: [0; DIRECT_PTRS],
            indirect_block: 0,
            double_indirect_block: 0,
            creation_time: 0,
            modification_time: 0,
            access_time: 0,
        }
    }

    /// 编号为 0 且所有块指针都为 0
    pub fn is_free(&self) -> bool {
        self.inode_number == 0
            && self.direct_blocks.iter().all(|&b| b == 0)
            && self.indirect_block == 0
            && self.double_indirect_block == 0
    }

    /// 在 inode 表中的槽位
    pub fn slot(&self) -> Option<u32> {
        self.inode_number.checked_sub(1)
    }

    pub fn touch(&mut self) {
        let now = current_timestamp();
        self.access_time = now;
        self.modification_time = now;
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| FileSystemError::Corrupted(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| FileSystemError::Corrupted(format!("undecodable inode record: {}", e)))
    }
}

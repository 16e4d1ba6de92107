//! SGFS：一个极简的自定义文件系统的磁盘布局与空闲空间管理。
//!
//! 卷内线性布局（块号相对于卷起始）：
//! - 超级块（块 0）
//! - 日志区（保留，不读写）
//! - 数据块位图
//! - inode 位图
//! - inode 表
//! - 数据区
//!
//! `disk` 负责底层设备与 GPT 分区表，`fs` 负责布局计算、位图分配、
//! inode 表以及逻辑块到物理块的地址转换。

pub mod disk;
pub mod fs;
pub mod utils;

pub use disk::{BlockDevice, FileDisk, RamDisk, Volume};
pub use fs::error::{FileSystemError, Resource, Result};
pub use fs::FileSystem;

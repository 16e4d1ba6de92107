//! Shared helpers for the integration tests
#![allow(dead_code)]

use sgfs::{
    fs::config::FormatOptions,
    FileSystem, RamDisk,
};

pub const MIB: usize = 1024 * 1024;

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

/// log!("...") -> println!("[test] ...")
#[macro_export]
macro_rules! log {
    ($msg:expr) => {
        println!("{}[test] {}{}", crate::common::ORANGE, $msg, crate::common::RESET)
    };
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

/// 1 MiB, 4096-byte blocks: 256 blocks, 25 inodes, data from block 218
pub fn small_fs() -> (RamDisk, FileSystem<RamDisk>) {
    formatted(MIB, 4096)
}

/// 4 MiB, 512-byte blocks: p = 128, enough room to reach the last double-indirect slot
pub fn fine_grained_fs() -> (RamDisk, FileSystem<RamDisk>) {
    formatted(4 * MIB, 512)
}

/// Formats a fresh RamDisk. The returned disk shares storage with the mounted handle.
pub fn formatted(size: usize, block_size: u32) -> (RamDisk, FileSystem<RamDisk>) {
    let disk = RamDisk::new(size);
    let fs = FileSystem::format(disk.clone(), &FormatOptions::with_block_size(block_size))
        .expect("format");
    (disk, fs)
}

/// A unique image path under the system temp dir
pub fn temp_image(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("sgfs-{}-{}.img", tag, uuid::Uuid::new_v4()))
}

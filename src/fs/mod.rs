use std::collections::HashSet;

use crate::{
    disk::BlockDevice,
    fs::{
        bitmap::{Bitmap, BitmapRegion},
        block_map::BlockMap,
        config::{FormatOptions, MountOptions, SUPER_BLOCK_BLOCK_ID},
        error::{FileSystemError, Resource, Result},
        geometry::compute_geometry,
        inode::{FileType, Inode},
        inode_table::InodeTable,
        super_block::SuperBlock,
    },
};

pub mod bitmap;
pub mod block_map;
pub mod config;
pub mod error;
pub mod geometry;
pub mod inode;
pub mod inode_table;
pub mod super_block;

/// 已挂载的文件系统。挂载状态就是这个句柄本身，卸载时把设备还给调用者。
///
/// 所有会修改磁盘的操作都需要 `&mut self`，同一时刻只有一个写者。
#[derive(Debug)]
pub struct FileSystem<D: BlockDevice> {
    disk: D,                    // 底层设备（整盘或分区窗口）
    super_block: SuperBlock,    // 文件系统总体信息
    block_bitmap: Bitmap,       // 数据块分配信息
    inode_bitmap: Bitmap,       // inode 分配信息
    inode_table: InodeTable,    // inode 表
    block_map: BlockMap,        // 逻辑块 → 物理块
}

/// `check()` 的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub inodes_in_use: u64,
    pub blocks_referenced: u64,
    pub problems: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

fn bitmap_regions(sb: &SuperBlock) -> (BitmapRegion, BitmapRegion) {
    let block_size = sb.block_size as usize;
    (
        BitmapRegion {
            start_block: sb.block_bitmap_start as u64,
            blocks: sb.block_bitmap_blocks() as u64,
            block_size,
        },
        BitmapRegion {
            start_block: sb.inode_bitmap_start as u64,
            blocks: sb.inode_bitmap_blocks() as u64,
            block_size,
        },
    )
}

impl<D: BlockDevice> FileSystem<D> {
    /// 在整个设备上创建文件系统，返回已挂载的句柄。
    ///
    /// 先清掉第 0 块，最后才写超级块：中途失败时设备上不会留下看似合法的超级块，
    /// 调用者只能从头重新格式化。日志区保持原样。
    pub fn format(disk: D, options: &FormatOptions) -> Result<Self> {
        let super_block = compute_geometry(disk.size()?, options)?;
        let zero = vec![0u8; super_block.block_size as usize];
        disk.write_block(SUPER_BLOCK_BLOCK_ID as u64, &zero)?;

        let (block_region, inode_region) = bitmap_regions(&super_block);
        let mut block_bitmap =
            Bitmap::new(Resource::Block, super_block.total_blocks as u64, block_region)?
                .with_scan_start(super_block.data_block_start as u64)
                .with_double_free_policy(options.double_free);
        block_bitmap.reserve(SUPER_BLOCK_BLOCK_ID as u64)?;
        let mut inode_bitmap =
            Bitmap::new(Resource::Inode, super_block.total_inodes as u64, inode_region)?
                .with_double_free_policy(options.double_free);

        block_bitmap.sync_all(&disk)?;
        inode_bitmap.sync_all(&disk)?;

        let inode_table = InodeTable::new(&super_block);
        inode_table.format(&disk)?;

        super_block.sync(&disk)?;
        disk.flush()?;

        Ok(Self {
            block_map: BlockMap::new(&super_block),
            disk,
            super_block,
            block_bitmap,
            inode_bitmap,
            inode_table,
        })
    }

    pub fn mount(disk: D) -> Result<Self> {
        Self::mount_with(disk, &MountOptions::default())
    }

    /// 读回超级块并重建位图。空闲计数与位图不一致视为超级块损坏。
    pub fn mount_with(disk: D, options: &MountOptions) -> Result<Self> {
        let super_block = SuperBlock::load(&disk)?;

        let needed = super_block.total_blocks as u64 * super_block.block_size as u64;
        let available = disk.size()?;
        if available < needed {
            return Err(FileSystemError::CorruptSuperblock(format!(
                "superblock describes {} bytes but the device only has {}",
                needed, available
            )));
        }

        let (block_region, inode_region) = bitmap_regions(&super_block);
        let block_bitmap = Bitmap::load(
            &disk,
            Resource::Block,
            super_block.total_blocks as u64,
            block_region,
        )?
        .with_scan_start(super_block.data_block_start as u64)
        .with_double_free_policy(options.double_free);
        let inode_bitmap = Bitmap::load(
            &disk,
            Resource::Inode,
            super_block.total_inodes as u64,
            inode_region,
        )?
        .with_double_free_policy(options.double_free);

        if block_bitmap.free_count() != super_block.free_blocks as u64 {
            return Err(FileSystemError::CorruptSuperblock(format!(
                "free_blocks is {} but the block bitmap has {} free bits",
                super_block.free_blocks,
                block_bitmap.free_count()
            )));
        }
        if inode_bitmap.free_count() != super_block.free_inodes as u64 {
            return Err(FileSystemError::CorruptSuperblock(format!(
                "free_inodes is {} but the inode bitmap has {} free bits",
                super_block.free_inodes,
                inode_bitmap.free_count()
            )));
        }

        Ok(Self {
            block_map: BlockMap::new(&super_block),
            inode_table: InodeTable::new(&super_block),
            disk,
            super_block,
            block_bitmap,
            inode_bitmap,
        })
    }

    /// 写回并落盘，然后交还设备
    pub fn unmount(mut self) -> Result<D> {
        self.sync()?;
        Ok(self.disk)
    }

    /// 把位图中被修改的块和超级块计数写回（不 flush）
    fn persist(&mut self) -> Result<()> {
        self.block_bitmap.sync(&self.disk)?;
        self.inode_bitmap.sync(&self.disk)?;
        self.super_block.free_blocks = self.block_bitmap.free_count() as u32;
        self.super_block.free_inodes = self.inode_bitmap.free_count() as u32;
        self.super_block.sync(&self.disk)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.persist()?;
        self.disk.flush()?;
        Ok(())
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn block_bitmap(&self) -> &Bitmap {
        &self.block_bitmap
    }

    pub fn inode_bitmap(&self) -> &Bitmap {
        &self.inode_bitmap
    }

    pub fn block_map(&self) -> &BlockMap {
        &self.block_map
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    pub fn alloc_inode(&mut self, file_type: FileType) -> Result<Inode> {
        let inode =
            self.inode_table
                .allocate_inode(&self.disk, &mut self.inode_bitmap, file_type)?;
        self.persist()?;
        Ok(inode)
    }

    /// 先释放 inode 引用的所有块，再清零记录、释放槽位
    pub fn free_inode(&mut self, n: u64) -> Result<()> {
        let mut inode = self.inode_table.read(&self.disk, n)?;
        if !inode.is_free() {
            let released = self
                .block_map
                .truncate(&self.disk, &mut self.block_bitmap, &mut inode, 0);
            if let Err(e) = released {
                // 已释放的指针要和位图一起落盘，inode 本身保留
                inode.touch();
                self.inode_table.write(&self.disk, n, &inode)?;
                self.persist()?;
                return Err(e);
            }
        }
        let result = self
            .inode_table
            .free_inode(&self.disk, &mut self.inode_bitmap, n);
        self.persist()?;
        result
    }

    pub fn read_inode(&self, n: u64) -> Result<Inode> {
        self.inode_table.read(&self.disk, n)
    }

    pub fn write_inode(&mut self, n: u64, inode: &Inode) -> Result<()> {
        self.inode_table.write(&self.disk, n, inode)
    }

    /// 读取一个已分配的 inode
    fn live_inode(&self, n: u64) -> Result<Inode> {
        let inode = self.inode_table.read(&self.disk, n)?;
        if !self.inode_bitmap.is_allocated(n)? || inode.is_free() {
            return Err(FileSystemError::InvalidInode(n));
        }
        Ok(inode)
    }

    pub fn alloc_block(&mut self) -> Result<u32> {
        let block = self.block_bitmap.allocate()?;
        self.persist()?;
        Ok(block as u32)
    }

    /// 只能释放数据区的块
    pub fn free_block(&mut self, block: u32) -> Result<()> {
        if !self.block_map.in_data_region(block) {
            return Err(FileSystemError::OutOfRange {
                resource: Resource::Block,
                index: block as u64,
                capacity: self.super_block.total_blocks as u64,
            });
        }
        self.block_bitmap.free(block as u64)?;
        self.persist()
    }

    pub fn logical_to_physical(&self, inode: &Inode, logical: u64) -> Result<Option<u32>> {
        self.block_map
            .logical_to_physical(&self.disk, inode, logical)
    }

    /// 让 inode `n` 的第 `logical` 块有数据块可用，返回物理块号
    pub fn map_block(&mut self, n: u64, logical: u64) -> Result<u32> {
        let mut inode = self.live_inode(n)?;
        let result = self
            .block_map
            .map(&self.disk, &mut self.block_bitmap, &mut inode, logical);

        // 失败时已挂上的间接块同样要落盘
        inode.touch();
        self.inode_table.write(&self.disk, n, &inode)?;
        self.persist()?;
        result
    }

    /// 把文件大小设为 `size`，释放超出部分占用的块
    pub fn truncate(&mut self, n: u64, size: u32) -> Result<()> {
        let mut inode = self.live_inode(n)?;
        let keep = (size as u64).div_ceil(self.super_block.block_size as u64);
        if keep > self.block_map.max_blocks() {
            return Err(FileSystemError::FileTooLarge {
                index: keep - 1,
                max: self.block_map.max_blocks(),
            });
        }

        let result = self
            .block_map
            .truncate(&self.disk, &mut self.block_bitmap, &mut inode, keep);
        if result.is_ok() {
            inode.file_size = size;
        }
        inode.touch();
        self.inode_table.write(&self.disk, n, &inode)?;
        self.persist()?;
        result
    }

    /// 检查计数、inode 槽位与位图、块指针三者是否一致
    pub fn check(&self) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        let sb = &self.super_block;

        if self.block_bitmap.free_count() != sb.free_blocks as u64 {
            report.problems.push(format!(
                "free_blocks {} != {} free bits in the block bitmap",
                sb.free_blocks,
                self.block_bitmap.free_count()
            ));
        }
        if self.inode_bitmap.free_count() != sb.free_inodes as u64 {
            report.problems.push(format!(
                "free_inodes {} != {} free bits in the inode bitmap",
                sb.free_inodes,
                self.inode_bitmap.free_count()
            ));
        }
        if !self.block_bitmap.is_allocated(SUPER_BLOCK_BLOCK_ID as u64)? {
            report
                .problems
                .push("superblock block is not reserved in the block bitmap".to_string());
        }

        let mut seen = HashSet::new();
        for n in 0..sb.total_inodes as u64 {
            let inode = match self.inode_table.read(&self.disk, n) {
                Ok(inode) => inode,
                Err(FileSystemError::Corrupted(msg)) => {
                    report.problems.push(format!("inode {}: {}", n, msg));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let allocated = self.inode_bitmap.is_allocated(n)?;

            if inode.is_free() {
                if allocated {
                    report
                        .problems
                        .push(format!("inode {} is marked allocated but its record is free", n));
                }
                continue;
            }
            if !allocated {
                report
                    .problems
                    .push(format!("inode {} is in use but its bitmap bit is clear", n));
            }
            if inode.slot() != Some(n as u32) {
                report.problems.push(format!(
                    "inode {} carries inode_number {}",
                    n, inode.inode_number
                ));
            }
            report.inodes_in_use += 1;

            for block in self.block_map.referenced_blocks(&self.disk, &inode)? {
                if !self.block_map.in_data_region(block) {
                    report
                        .problems
                        .push(format!("inode {} points outside the data area: {}", n, block));
                    continue;
                }
                if !self.block_bitmap.is_allocated(block as u64)? {
                    report
                        .problems
                        .push(format!("inode {} uses free block {}", n, block));
                }
                if !seen.insert(block) {
                    report
                        .problems
                        .push(format!("block {} is referenced more than once", block));
                }
            }
        }
        report.blocks_referenced = seen.len() as u64;
        Ok(report)
    }
}

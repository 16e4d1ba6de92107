//! 逻辑块号 → 物理块号。
//!
//! ```text
//! [0, 12)                     直接指针
//! [12, 12 + p)                一级间接：indirect_block 指向 p 个指针
//! [12 + p, 12 + p + p * p)    二级间接：double_indirect_block → p 个一级间接块
//! ```
//!
//! 其中 p = block_size / 4。指针块中的指针是小端 u32，0 表示空洞。

use crate::{
    disk::BlockDevice,
    fs::{
        bitmap::Bitmap,
        config::{DIRECT_PTRS, POINTER_SIZE},
        error::{FileSystemError, Resource, Result},
        inode::Inode,
        super_block::SuperBlock,
    },
};

/// 逻辑块号落在哪一级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLevel {
    Direct(usize),
    /// 一级间接块内的下标
    Indirect(u64),
    /// (二级间接块内的下标, 一级间接块内的下标)
    DoubleIndirect(u64, u64),
}

#[derive(Debug, Clone, Copy)]
pub struct BlockMap {
    block_size: usize,
    pointers_per_block: u64,
    data_block_start: u32,
    total_blocks: u32,
}

impl BlockMap {
    pub fn new(sb: &SuperBlock) -> Self {
        Self {
            block_size: sb.block_size as usize,
            pointers_per_block: sb.pointers_per_block() as u64,
            data_block_start: sb.data_block_start,
            total_blocks: sb.total_blocks,
        }
    }

    pub fn pointers_per_block(&self) -> u64 {
        self.pointers_per_block
    }

    /// 一个文件最多能寻址的块数
    pub fn max_blocks(&self) -> u64 {
        let p = self.pointers_per_block;
        DIRECT_PTRS as u64 + p + p * p
    }

    pub fn locate(&self, logical: u64) -> Result<BlockLevel> {
        let p = self.pointers_per_block;
        let direct = DIRECT_PTRS as u64;

        if logical < direct {
            Ok(BlockLevel::Direct(logical as usize))
        } else if logical < direct + p {
            Ok(BlockLevel::Indirect(logical - direct))
        } else if logical < self.max_blocks() {
            let rest = logical - direct - p;
            Ok(BlockLevel::DoubleIndirect(rest / p, rest % p))
        } else {
            Err(FileSystemError::FileTooLarge {
                index: logical,
                max: self.max_blocks(),
            })
        }
    }

    pub fn in_data_region(&self, block: u32) -> bool {
        block >= self.data_block_start && block < self.total_blocks
    }

    /// 0 是空洞；非 0 指针必须落在数据区
    fn check_pointer(&self, ptr: u32) -> Result<Option<u32>> {
        match ptr {
            0 => Ok(None),
            b if self.in_data_region(b) => Ok(Some(b)),
            b => Err(FileSystemError::OutOfRange {
                resource: Resource::Block,
                index: b as u64,
                capacity: self.total_blocks as u64,
            }),
        }
    }

    fn entry_offset(&self, table: u32, i: u64) -> u64 {
        table as u64 * self.block_size as u64 + i * POINTER_SIZE as u64
    }

    fn read_entry<D: BlockDevice + ?Sized>(&self, disk: &D, table: u32, i: u64) -> Result<u32> {
        let mut raw = [0u8; POINTER_SIZE as usize];
        disk.read_at(self.entry_offset(table, i), &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    fn write_entry<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        table: u32,
        i: u64,
        value: u32,
    ) -> Result<()> {
        disk.write_at(self.entry_offset(table, i), &value.to_le_bytes())?;
        Ok(())
    }

    fn read_pointers<D: BlockDevice + ?Sized>(&self, disk: &D, table: u32) -> Result<Vec<u32>> {
        let mut block_buf = vec![0u8; self.block_size];
        disk.read_block(table as u64, &mut block_buf)?;
        Ok(block_buf
            .chunks_exact(POINTER_SIZE as usize)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn write_pointers<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        table: u32,
        ptrs: &[u32],
    ) -> Result<()> {
        let block_buf: Vec<u8> = ptrs.iter().flat_map(|p| p.to_le_bytes()).collect();
        disk.write_block(table as u64, &block_buf)?;
        Ok(())
    }

    /// 查询映射，空洞返回 None
    pub fn logical_to_physical<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        inode: &Inode,
        logical: u64,
    ) -> Result<Option<u32>> {
        match self.locate(logical)? {
            BlockLevel::Direct(i) => self.check_pointer(inode.direct_blocks[i]),
            BlockLevel::Indirect(i) => match self.check_pointer(inode.indirect_block)? {
                Some(table) => self.check_pointer(self.read_entry(disk, table, i)?),
                None => Ok(None),
            },
            BlockLevel::DoubleIndirect(i, j) => {
                let Some(top) = self.check_pointer(inode.double_indirect_block)? else {
                    return Ok(None);
                };
                let Some(mid) = self.check_pointer(self.read_entry(disk, top, i)?)? else {
                    return Ok(None);
                };
                self.check_pointer(self.read_entry(disk, mid, j)?)
            }
        }
    }

    /// 分配一个块并清零
    fn alloc_zeroed<D: BlockDevice + ?Sized>(&self, disk: &D, bitmap: &mut Bitmap) -> Result<u32> {
        let block = bitmap.allocate()?;
        let zero = vec![0u8; self.block_size];
        if let Err(e) = disk.write_block(block, &zero) {
            bitmap.free(block)?;
            return Err(e.into());
        }
        Ok(block as u32)
    }

    fn ensure_slot<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        bitmap: &mut Bitmap,
        slot: &mut u32,
    ) -> Result<u32> {
        if let Some(b) = self.check_pointer(*slot)? {
            return Ok(b);
        }
        let b = self.alloc_zeroed(disk, bitmap)?;
        *slot = b;
        Ok(b)
    }

    fn ensure_entry<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        bitmap: &mut Bitmap,
        table: u32,
        i: u64,
    ) -> Result<u32> {
        if let Some(b) = self.check_pointer(self.read_entry(disk, table, i)?)? {
            return Ok(b);
        }
        let b = self.alloc_zeroed(disk, bitmap)?;
        if let Err(e) = self.write_entry(disk, table, i, b) {
            bitmap.free(b as u64)?;
            return Err(e);
        }
        Ok(b)
    }

    /// 保证 `logical` 有对应的数据块，必要时先分配路径上的间接块。
    /// 修改了 inode 的指针，调用者负责写回 inode 和同步位图。
    pub fn map<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        bitmap: &mut Bitmap,
        inode: &mut Inode,
        logical: u64,
    ) -> Result<u32> {
        match self.locate(logical)? {
            BlockLevel::Direct(i) => self.ensure_slot(disk, bitmap, &mut inode.direct_blocks[i]),
            BlockLevel::Indirect(i) => {
                let table = self.ensure_slot(disk, bitmap, &mut inode.indirect_block)?;
                self.ensure_entry(disk, bitmap, table, i)
            }
            BlockLevel::DoubleIndirect(i, j) => {
                let top = self.ensure_slot(disk, bitmap, &mut inode.double_indirect_block)?;
                let mid = self.ensure_entry(disk, bitmap, top, i)?;
                self.ensure_entry(disk, bitmap, mid, j)
            }
        }
    }

    /// 释放 `table` 中逻辑号 >= keep 的数据块（从后往前）。
    /// 已清零的指针总是先写回，中途出错时磁盘上也不会留下指向空闲块的指针。
    fn release_entries<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        bitmap: &mut Bitmap,
        table: u32,
        base: u64,
        keep: u64,
    ) -> Result<()> {
        let mut ptrs = self.read_pointers(disk, table)?;
        let mut changed = false;
        let mut result = Ok(());

        for j in (0..ptrs.len()).rev() {
            if base + (j as u64) < keep {
                break;
            }
            let freed = self
                .check_pointer(ptrs[j])
                .and_then(|ptr| match ptr {
                    Some(b) => bitmap.free(b as u64).map(|()| true),
                    None => Ok(false),
                });
            match freed {
                Ok(true) => {
                    ptrs[j] = 0;
                    changed = true;
                }
                Ok(false) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if changed {
            self.write_pointers(disk, table, &ptrs)?;
        }
        result
    }

    /// 释放二级间接块 `mids` 下逻辑号 >= keep 的部分，被整块释放的一级间接块在 `mids` 中清零
    fn release_tables<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        bitmap: &mut Bitmap,
        mids: &mut [u32],
        double_base: u64,
        keep: u64,
    ) -> Result<()> {
        let p = self.pointers_per_block;
        for i in (0..mids.len()).rev() {
            let base = double_base + i as u64 * p;
            if base + p <= keep {
                break;
            }
            let Some(mid) = self.check_pointer(mids[i])? else {
                continue;
            };
            self.release_entries(disk, bitmap, mid, base, keep)?;
            if base >= keep {
                bitmap.free(mid as u64)?;
                mids[i] = 0;
            }
        }
        Ok(())
    }

    /// 只保留前 `keep` 个逻辑块，按逆序释放数据块和不再需要的间接块。
    /// 出错时 inode 中已清零的指针保留在 `inode` 里，调用者仍需写回。
    pub fn truncate<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        bitmap: &mut Bitmap,
        inode: &mut Inode,
        keep: u64,
    ) -> Result<()> {
        let p = self.pointers_per_block;
        let indirect_base = DIRECT_PTRS as u64;
        let double_base = indirect_base + p;

        // 二级间接
        if let Some(top) = self.check_pointer(inode.double_indirect_block)? {
            let mut mids = self.read_pointers(disk, top)?;
            let released = self.release_tables(disk, bitmap, &mut mids, double_base, keep);
            self.write_pointers(disk, top, &mids)?;
            released?;

            if double_base >= keep {
                bitmap.free(top as u64)?;
                inode.double_indirect_block = 0;
            }
        }

        // 一级间接
        if let Some(table) = self.check_pointer(inode.indirect_block)? {
            self.release_entries(disk, bitmap, table, indirect_base, keep)?;
            if indirect_base >= keep {
                bitmap.free(table as u64)?;
                inode.indirect_block = 0;
            }
        }

        // 直接
        let first = keep.min(DIRECT_PTRS as u64) as usize;
        for i in (first..DIRECT_PTRS).rev() {
            if let Some(b) = self.check_pointer(inode.direct_blocks[i])? {
                bitmap.free(b as u64)?;
                inode.direct_blocks[i] = 0;
            }
        }
        Ok(())
    }

    /// inode 引用的所有块（含间接块），不做范围检查，供一致性检查使用
    pub fn referenced_blocks<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        inode: &Inode,
    ) -> Result<Vec<u32>> {
        let mut blocks: Vec<u32> = inode
            .direct_blocks
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();

        if inode.indirect_block != 0 {
            blocks.push(inode.indirect_block);
            if self.in_data_region(inode.indirect_block) {
                let ptrs = self.read_pointers(disk, inode.indirect_block)?;
                blocks.extend(ptrs.into_iter().filter(|&b| b != 0));
            }
        }

        if inode.double_indirect_block != 0 {
            blocks.push(inode.double_indirect_block);
            if self.in_data_region(inode.double_indirect_block) {
                for mid in self.read_pointers(disk, inode.double_indirect_block)? {
                    if mid == 0 {
                        continue;
                    }
                    blocks.push(mid);
                    if self.in_data_region(mid) {
                        let ptrs = self.read_pointers(disk, mid)?;
                        blocks.extend(ptrs.into_iter().filter(|&b| b != 0));
                    }
                }
            }
        }
        Ok(blocks)
    }
}

//! 数据块位图与 inode 位图共用的位图分配器。
//!
//! 第 i 位位于第 i / 8 字节的第 i % 8 位（低位在前），1 = 已占用，0 = 空闲。
//! 内存里只保存覆盖 `len` 个有效位所需的字节；有效位之后直到区域末尾的
//! 填充位一律视为已占用，扫描永远不会返回越界编号。

use crate::{
    disk::BlockDevice,
    fs::{
        config::DoubleFreePolicy,
        error::{FileSystemError, Resource, Result},
    },
};

/// 位图在磁盘上占据的区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapRegion {
    pub start_block: u64,
    pub blocks: u64,
    pub block_size: usize,
}

impl BitmapRegion {
    fn bytes(&self) -> u64 {
        self.blocks * self.block_size as u64
    }
}

#[derive(Debug, Clone)]
pub struct Bitmap {
    resource: Resource,
    bits: Vec<u8>,       // 有效位所在的字节
    len: u64,            // 有效位数
    free: u64,           // 当前空闲位数
    region: BitmapRegion,
    scan_start: u64,     // 首次适配扫描的起点
    double_free: DoubleFreePolicy,
    dirty: Vec<bool>,    // 区域内每块是否有未写回的修改
}

impl Bitmap {
    /// 全部空闲的新位图（填充位已占用）
    pub fn new(resource: Resource, len: u64, region: BitmapRegion) -> Result<Self> {
        let byte_len = len.div_ceil(8);
        if byte_len > region.bytes() {
            return Err(FileSystemError::InvalidGeometry(format!(
                "{} {} bits do not fit in a {}-block bitmap region",
                len, resource, region.blocks
            )));
        }

        let mut bitmap = Self {
            resource,
            bits: vec![0; byte_len as usize],
            len,
            free: len,
            region,
            scan_start: 0,
            double_free: DoubleFreePolicy::default(),
            dirty: vec![true; Self::live_blocks(byte_len, region.block_size)],
        };
        bitmap.reserve_tail();
        Ok(bitmap)
    }

    pub fn with_scan_start(mut self, scan_start: u64) -> Self {
        self.scan_start = scan_start;
        self
    }

    pub fn with_double_free_policy(mut self, policy: DoubleFreePolicy) -> Self {
        self.double_free = policy;
        self
    }

    /// 从磁盘加载，空闲数按 popcount 重新计算
    pub fn load<D: BlockDevice + ?Sized>(
        disk: &D,
        resource: Resource,
        len: u64,
        region: BitmapRegion,
    ) -> Result<Self> {
        let mut bitmap = Self::new(resource, len, region)?;
        let byte_len = bitmap.bits.len();
        let mut block_buf = vec![0u8; region.block_size];
        let mut bits = Vec::with_capacity(bitmap.dirty.len() * region.block_size);

        for i in 0..bitmap.dirty.len() as u64 {
            disk.read_block(region.start_block + i, &mut block_buf)?;
            bits.extend_from_slice(&block_buf);
        }

        // 截掉多余的字节
        bits.truncate(byte_len);
        bitmap.bits = bits;
        bitmap.reserve_tail();

        let used: u64 = bitmap.bits.iter().map(|b| b.count_ones() as u64).sum();
        let tail = byte_len as u64 * 8 - len;
        bitmap.free = len - (used - tail);
        bitmap.dirty.fill(false);
        Ok(bitmap)
    }

    fn live_blocks(byte_len: u64, block_size: usize) -> usize {
        byte_len.div_ceil(block_size as u64) as usize
    }

    /// 把最后一个字节中超出 len 的位置为已占用
    fn reserve_tail(&mut self) {
        let rem = (self.len % 8) as u32;
        if rem != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last |= !((1u8 << rem) - 1);
            }
        }
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.len {
            return Err(FileSystemError::OutOfRange {
                resource: self.resource,
                index,
                capacity: self.len,
            });
        }
        Ok(())
    }

    fn mark_dirty(&mut self, byte_index: usize) {
        self.dirty[byte_index / self.region.block_size] = true;
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free_count(&self) -> u64 {
        self.free
    }

    pub fn region(&self) -> BitmapRegion {
        self.region
    }

    pub fn is_allocated(&self, index: u64) -> Result<bool> {
        self.check_index(index)?;
        Ok(self.bits[(index / 8) as usize] & (1 << (index % 8)) != 0)
    }

    /// 从 scan_start 起首次适配，返回被占用的编号
    pub fn allocate(&mut self) -> Result<u64> {
        let first = (self.scan_start / 8) as usize;
        let head_mask = ((1u16 << (self.scan_start % 8)) - 1) as u8;

        for byte_index in first..self.bits.len() {
            let mut byte = self.bits[byte_index];
            if byte_index == first {
                byte |= head_mask;
            }
            if byte == 0xFF {
                continue;
            }

            let bit = byte.trailing_ones() as u64;
            let index = byte_index as u64 * 8 + bit;
            if index >= self.len {
                break;
            }
            self.bits[byte_index] |= 1 << bit;
            self.free -= 1;
            self.mark_dirty(byte_index);
            return Ok(index);
        }

        Err(FileSystemError::Exhausted(self.resource))
    }

    /// 占用指定编号（例如超级块所在的块）
    pub fn reserve(&mut self, index: u64) -> Result<()> {
        self.check_index(index)?;
        let byte_index = (index / 8) as usize;
        let mask = 1u8 << (index % 8);
        if self.bits[byte_index] & mask == 0 {
            self.bits[byte_index] |= mask;
            self.free -= 1;
            self.mark_dirty(byte_index);
        }
        Ok(())
    }

    pub fn free(&mut self, index: u64) -> Result<()> {
        self.check_index(index)?;
        let byte_index = (index / 8) as usize;
        let mask = 1u8 << (index % 8);

        if self.bits[byte_index] & mask == 0 {
            return match self.double_free {
                DoubleFreePolicy::Reject => Err(FileSystemError::DoubleFree {
                    resource: self.resource,
                    index,
                }),
                DoubleFreePolicy::Ignore => Ok(()),
            };
        }

        self.bits[byte_index] &= !mask;
        self.free += 1;
        self.mark_dirty(byte_index);
        Ok(())
    }

    /// 只写回被修改过的块
    pub fn sync<D: BlockDevice + ?Sized>(&mut self, disk: &D) -> Result<()> {
        for i in 0..self.dirty.len() {
            if self.dirty[i] {
                self.write_region_block(disk, i as u64)?;
                self.dirty[i] = false;
            }
        }
        Ok(())
    }

    /// 写回整个区域，包括只含填充位的块（格式化时使用）
    pub fn sync_all<D: BlockDevice + ?Sized>(&mut self, disk: &D) -> Result<()> {
        for i in 0..self.region.blocks {
            self.write_region_block(disk, i)?;
        }
        self.dirty.fill(false);
        Ok(())
    }

    fn write_region_block<D: BlockDevice + ?Sized>(&self, disk: &D, i: u64) -> Result<()> {
        let block_size = self.region.block_size;
        // 有效字节之外全部填 1
        let mut block_buf = vec![0xFFu8; block_size];
        let start = i as usize * block_size;
        if start < self.bits.len() {
            let end = (start + block_size).min(self.bits.len());
            block_buf[..end - start].copy_from_slice(&self.bits[start..end]);
        }
        disk.write_block(self.region.start_block + i, &block_buf)?;
        Ok(())
    }
}

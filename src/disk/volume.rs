use std::io::Result;

use crate::disk::{
    block_device::{check_bounds, BlockDevice},
    gpt::{read_partition_table, GptPartitionEntry},
    types::SECTOR_SIZE,
};
use crate::fs::error::FileSystemError;

/// 底层设备上的一段连续字节窗口，文件系统在窗口内从 0 开始编址
#[derive(Debug)]
pub struct Volume<D> {
    inner: D,
    offset: u64, // 窗口在底层设备中的起始字节
    len: u64,    // 窗口长度（字节）
}

impl<D: BlockDevice> Volume<D> {
    pub fn new(inner: D, offset: u64, len: u64) -> Result<Self> {
        check_bounds(offset, len as usize, inner.size()?)?;
        Ok(Self { inner, offset, len })
    }

    /// 覆盖整个设备
    pub fn whole(inner: D) -> Result<Self> {
        let len = inner.size()?;
        Ok(Self {
            inner,
            offset: 0,
            len,
        })
    }

    /// 覆盖一个 GPT 分区 `[first_lba, last_lba]`
    pub fn from_partition(inner: D, entry: &GptPartitionEntry) -> Result<Self> {
        let offset = entry.first_lba * SECTOR_SIZE;
        let len = (entry.last_lba - entry.first_lba + 1) * SECTOR_SIZE;
        Self::new(inner, offset, len)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: BlockDevice> BlockDevice for Volume<D> {
    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        self.inner.read_at(self.offset + offset, buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        self.inner.write_at(self.offset + offset, buf)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

/// 有合法 GPT 时返回其中唯一分区的窗口，否则返回整盘窗口
pub fn open_volume<D: BlockDevice>(device: D) -> crate::fs::error::Result<Volume<D>> {
    match read_partition_table(&device) {
        Ok(table) => Ok(Volume::from_partition(device, table.partition())?),
        Err(FileSystemError::InvalidPartitionTable(_)) | Err(FileSystemError::InvalidGeometry(_)) => {
            Ok(Volume::whole(device)?)
        }
        Err(e) => Err(e),
    }
}

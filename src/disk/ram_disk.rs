use std::{
    io::Result,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::disk::block_device::{check_bounds, BlockDevice};

/// 内存盘。克隆出来的句柄共享同一份存储，方便卸载后重新挂载检查。
#[derive(Debug, Clone)]
pub struct RamDisk {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl RamDisk {
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![0u8; size])),
        }
    }

    /// 整盘内容的拷贝
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.inner
            .lock()
            .map_err(|_| std::io::Error::other("ram disk lock poisoned"))
    }
}

impl BlockDevice for RamDisk {
    fn size(&self) -> Result<u64> {
        Ok(self.lock()?.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.lock()?;
        check_bounds(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.lock()?;
        check_bounds(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

use std::{
    fs::{File, OpenOptions},
    io::{Read, Result, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::disk::block_device::{check_bounds, BlockDevice};

/// 以普通文件（磁盘镜像）或块设备节点作为后端的设备
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    size: u64,
}

impl FileDisk {
    /// 打开已存在的镜像
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        // 块设备节点的 metadata 长度为 0
        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }

    /// 打开或创建镜像，长度不足 `size` 时扩展到 `size`
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < size {
            file.set_len(size)?;
        }
        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| std::io::Error::other("disk file lock poisoned"))
    }
}

impl BlockDevice for FileDisk {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size)?;
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size)?;
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let file = self.lock()?;
        file.sync_all()
    }
}

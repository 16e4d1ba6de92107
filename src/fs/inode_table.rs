use crate::{
    disk::BlockDevice,
    fs::{
        bitmap::Bitmap,
        error::{FileSystemError, Resource, Result},
        inode::{FileType, Inode, INODE_RECORD_SIZE},
        super_block::SuperBlock,
    },
};

/// inode 表：从 `start_block` 开始按 `inode_size` 紧密排列的记录，
/// 区域本身占 `total_inodes` 块。
#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    pub start_block: u64,
    pub block_size: u64,
    pub inode_size: u64,
    pub total_inodes: u64,
}

impl InodeTable {
    pub fn new(sb: &SuperBlock) -> Self {
        Self {
            start_block: sb.inode_table_start as u64,
            block_size: sb.block_size as u64,
            inode_size: sb.inode_size as u64,
            total_inodes: sb.total_inodes as u64,
        }
    }

    fn offset(&self, n: u64) -> Result<u64> {
        if n >= self.total_inodes {
            return Err(FileSystemError::OutOfRange {
                resource: Resource::Inode,
                index: n,
                capacity: self.total_inodes,
            });
        }
        Ok(self.start_block * self.block_size + n * self.inode_size)
    }

    /// 把整张表清零
    pub fn format<D: BlockDevice + ?Sized>(&self, disk: &D) -> Result<()> {
        let zero = vec![0u8; self.block_size as usize];
        for i in 0..self.total_inodes {
            disk.write_block(self.start_block + i, &zero)?;
        }
        Ok(())
    }

    pub fn read<D: BlockDevice + ?Sized>(&self, disk: &D, n: u64) -> Result<Inode> {
        let offset = self.offset(n)?;
        let mut record = [0u8; INODE_RECORD_SIZE as usize];
        disk.read_at(offset, &mut record)?;
        Inode::decode(&record)
    }

    pub fn write<D: BlockDevice + ?Sized>(&self, disk: &D, n: u64, inode: &Inode) -> Result<()> {
        let offset = self.offset(n)?;
        disk.write_at(offset, &inode.encode()?)?;
        Ok(())
    }

    /// 从 inode 位图取一个空闲槽位，写入新的 inode 并返回。
    /// 写盘失败时把位图中的位还回去。位图本身由调用者负责 sync。
    pub fn allocate_inode<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        inode_bitmap: &mut Bitmap,
        file_type: FileType,
    ) -> Result<Inode> {
        let n = inode_bitmap.allocate()?;
        let inode = Inode::new(n as u32, file_type);

        if let Err(e) = self.write(disk, n, &inode) {
            inode_bitmap.free(n)?;
            return Err(e);
        }
        Ok(inode)
    }

    /// 清零记录并释放位图中的位
    pub fn free_inode<D: BlockDevice + ?Sized>(
        &self,
        disk: &D,
        inode_bitmap: &mut Bitmap,
        n: u64,
    ) -> Result<()> {
        if !inode_bitmap.is_allocated(n)? {
            return inode_bitmap.free(n);
        }
        self.write(disk, n, &Inode::empty())?;
        inode_bitmap.free(n)
    }
}

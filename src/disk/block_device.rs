use std::io::Result;

/// 可按字节偏移寻址的块设备。
///
/// 块的大小由调用者传入的缓冲区长度决定，所以同一个设备既可以按 512 字节
/// 扇区访问（分区表），也可以按文件系统块大小访问。
pub trait BlockDevice: Send + Sync {
    /// 设备总字节数
    fn size(&self) -> Result<u64>;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// 把缓存中的写入落盘
    fn flush(&self) -> Result<()>;

    fn read_block(&self, block_id: u64, buf: &mut [u8]) -> Result<()> {
        self.read_at(block_id * buf.len() as u64, buf)
    }

    fn write_block(&self, block_id: u64, buf: &[u8]) -> Result<()> {
        self.write_at(block_id * buf.len() as u64, buf)
    }
}

/// 检查 `[offset, offset + len)` 是否落在 `size` 字节的设备内
pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "access [{}, +{}) is beyond the end of the device ({} bytes)",
                offset, len, size
            ),
        )),
    }
}

/// 分区表使用的扇区（LBA）大小：512 字节
pub const SECTOR_SIZE: u64 = 512;

/// 新建镜像的默认大小：16MB
pub const DEFAULT_DISK_SIZE: u64 = 16 * 1024 * 1024;

/// 默认镜像路径
pub const DEFAULT_IMAGE_PATH: &str = "disk.img";

/// 默认 GPT 分区名
pub const DEFAULT_PARTITION_NAME: &str = "SGFS";

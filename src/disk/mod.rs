pub mod block_device;
pub mod file_disk;
pub mod gpt;
pub mod init;
pub mod ram_disk;
pub mod types;
pub mod volume;

pub use block_device::BlockDevice;
pub use file_disk::FileDisk;
pub use gpt::{read_partition_table, write_partition_table, PartitionTable};
pub use ram_disk::RamDisk;
pub use types::*;
pub use volume::{open_volume, Volume};

use std::{path::Path, sync::mpsc::Sender};

use crate::{
    disk::{
        file_disk::FileDisk,
        gpt::write_partition_table,
        types::{DEFAULT_DISK_SIZE, DEFAULT_PARTITION_NAME},
        volume::{open_volume, Volume},
    },
    fs::{config::FormatOptions, error::Result, FileSystem},
};

/// 镜像上挂载的文件系统
pub type MountedFs = FileSystem<Volume<FileDisk>>;

/// 初始化过程中发给界面线程的消息
#[derive(Debug)]
pub enum BootProgress {
    Step(&'static str),
    Progress(u64),
    Finished(Result<MountedFs>),
}

#[derive(Debug, Clone)]
pub struct InitRequest {
    pub disk_size: u64,      // 新建镜像的大小
    pub partitioned: bool,   // 是否先写 GPT 再在分区里格式化
    pub force_format: bool,  // 镜像已存在时也重新格式化
    pub format: FormatOptions,
}

impl Default for InitRequest {
    fn default() -> Self {
        Self {
            disk_size: DEFAULT_DISK_SIZE,
            partitioned: true,
            force_format: false,
            format: FormatOptions::default(),
        }
    }
}

fn report(tx: &Sender<BootProgress>, msg: BootProgress) {
    // 界面线程退出后进度无人接收，忽略即可
    let _ = tx.send(msg);
}

/// 打开（必要时创建并格式化）镜像并挂载，结果通过 `Finished` 发回
pub fn perform_disk_initialization(path: &Path, request: &InitRequest, tx: Sender<BootProgress>) {
    let result = initialize(path, request, &tx);
    report(&tx, BootProgress::Finished(result));
}

fn initialize(path: &Path, request: &InitRequest, tx: &Sender<BootProgress>) -> Result<MountedFs> {
    report(tx, BootProgress::Step("🧠 Initializing virtual disk..."));

    let disk_exists = path.exists();
    let disk = if disk_exists {
        FileDisk::open(path)?
    } else {
        report(tx, BootProgress::Step("🪶 Allocating disk space..."));
        FileDisk::create(path, request.disk_size)?
    };
    report(tx, BootProgress::Progress(30));

    // 只有新盘或明确要求时才格式化
    let disk = if !disk_exists || request.force_format {
        format_disk(disk, request, tx)?
    } else {
        disk
    };

    // 不论是否新盘，最终都从磁盘重新挂载
    report(tx, BootProgress::Step("⚙️ Mounting file system..."));
    let fs = FileSystem::mount(open_volume(disk)?)?;
    report(tx, BootProgress::Progress(100));
    Ok(fs)
}

fn format_disk(disk: FileDisk, request: &InitRequest, tx: &Sender<BootProgress>) -> Result<FileDisk> {
    let volume = if request.partitioned {
        report(tx, BootProgress::Step("🧩 Writing GPT partition table..."));
        let table = write_partition_table(&disk, DEFAULT_PARTITION_NAME)?;
        report(tx, BootProgress::Progress(50));
        Volume::from_partition(disk, table.partition())?
    } else {
        Volume::whole(disk)?
    };

    report(tx, BootProgress::Step("🔧 Formatting file system..."));
    let fs = FileSystem::format(volume, &request.format)?;
    report(tx, BootProgress::Progress(80));

    Ok(fs.unmount()?.into_inner())
}

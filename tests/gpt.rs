mod common;

use common::{temp_image, MIB};
use sgfs::disk::{
    gpt::{GptHeader, SGFS_PARTITION_TYPE},
    init::{perform_disk_initialization, BootProgress, InitRequest},
    open_volume, read_partition_table, write_partition_table, SECTOR_SIZE,
};
use sgfs::fs::{config::FormatOptions, inode::FileType};
use sgfs::{BlockDevice, FileSystem, FileSystemError, RamDisk, Volume};

const DISK: usize = 4 * MIB;
const TOTAL_LBA: u64 = (DISK as u64) / SECTOR_SIZE;

#[test]
fn single_partition_layout() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();
    let part = table.partition();

    assert_eq!(part.first_lba, 34);
    assert_eq!(part.last_lba, TOTAL_LBA - 34);
    assert_eq!(part.type_guid, SGFS_PARTITION_TYPE);
    assert_eq!(part.name, "SGFS");
    assert_eq!(table.header.my_lba, 1);
    assert_eq!(table.header.alternate_lba, TOTAL_LBA - 1);

    let read = read_partition_table(&disk).unwrap();
    assert_eq!(read, table);
}

#[test]
fn protective_mbr_and_backup_header() {
    let disk = RamDisk::new(DISK);
    write_partition_table(&disk, "SGFS").unwrap();

    let mut mbr = [0u8; 512];
    disk.read_at(0, &mut mbr).unwrap();
    assert_eq!(mbr[450], 0xEE);
    assert_eq!(&mbr[510..], &[0x55, 0xAA]);

    let mut sector = [0u8; 512];
    disk.read_at((TOTAL_LBA - 1) * SECTOR_SIZE, &mut sector).unwrap();
    let backup = GptHeader::decode(&sector).unwrap();
    assert_eq!(backup.my_lba, TOTAL_LBA - 1);
    assert_eq!(backup.alternate_lba, 1);
    assert_eq!(backup.partition_entry_lba, TOTAL_LBA - 33);
}

#[test]
fn header_crc_detects_corruption() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();
    let mut sector = table.header.encode();
    sector[40] ^= 0x01;
    assert!(matches!(
        GptHeader::decode(&sector),
        Err(FileSystemError::InvalidPartitionTable(_))
    ));
}

#[test]
fn falls_back_to_backup_header() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();

    // trash the primary header
    disk.write_at(SECTOR_SIZE, &[0u8; 512]).unwrap();
    let read = read_partition_table(&disk).unwrap();
    assert_eq!(read.partition, table.partition);
    assert_eq!(read.header.my_lba, TOTAL_LBA - 1);
}

#[test]
fn falls_back_when_primary_entries_are_corrupt() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();

    disk.write_at(2 * SECTOR_SIZE + 40, &[0xFF; 8]).unwrap();
    let read = read_partition_table(&disk).unwrap();
    assert_eq!(read.partition, table.partition);
}

#[test]
fn both_tables_broken() {
    let disk = RamDisk::new(DISK);
    write_partition_table(&disk, "SGFS").unwrap();
    disk.write_at(SECTOR_SIZE, &[0u8; 512]).unwrap();
    disk.write_at((TOTAL_LBA - 1) * SECTOR_SIZE, &[0u8; 512]).unwrap();
    assert!(matches!(
        read_partition_table(&disk),
        Err(FileSystemError::InvalidPartitionTable(_))
    ));
}

#[test]
fn device_too_small() {
    let disk = RamDisk::new(67 * 512);
    assert!(matches!(
        write_partition_table(&disk, "SGFS"),
        Err(FileSystemError::InvalidGeometry(_))
    ));
}

#[test]
fn format_inside_partition() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();
    let volume = Volume::from_partition(disk.clone(), table.partition()).unwrap();
    assert_eq!(volume.offset(), 34 * SECTOR_SIZE);

    let mut fs = FileSystem::format(volume, &FormatOptions::with_block_size(512)).unwrap();
    fs.alloc_inode(FileType::Regular).unwrap();
    fs.map_block(0, 0).unwrap();
    let sb = *fs.super_block();
    assert_eq!(sb.total_blocks as u64, table.partition().sectors());
    fs.unmount().unwrap();

    // GPT is still intact after formatting
    read_partition_table(&disk).unwrap();

    let fs = FileSystem::mount(open_volume(disk).unwrap()).unwrap();
    assert_eq!(fs.disk().offset(), 34 * SECTOR_SIZE);
    assert_eq!(*fs.super_block(), sb);
    assert!(fs.check().unwrap().is_clean());
}

#[test]
fn raw_disk_opens_whole() {
    let disk = RamDisk::new(MIB);
    FileSystem::format(disk.clone(), &FormatOptions::default()).unwrap();

    let volume = open_volume(disk).unwrap();
    assert_eq!(volume.offset(), 0);
    let fs = FileSystem::mount(volume).unwrap();
    assert_eq!(fs.super_block().total_blocks, 256);
}

#[test]
fn volume_bounds() {
    let disk = RamDisk::new(MIB);
    let volume = Volume::new(disk, 4096, 8192).unwrap();
    assert_eq!(volume.size().unwrap(), 8192);
    volume.write_at(8192 - 4, &[1, 2, 3, 4]).unwrap();
    assert!(volume.write_at(8192 - 3, &[1, 2, 3, 4]).is_err());

    let mut raw = [0u8; 4];
    volume.inner().read_at(4096 + 8192 - 4, &mut raw).unwrap();
    assert_eq!(raw, [1, 2, 3, 4]);

    assert!(Volume::new(RamDisk::new(MIB), MIB as u64 - 10, 11).is_err());
}

#[test]
fn init_creates_and_reopens_an_image() {
    let path = temp_image("init");
    let request = InitRequest {
        disk_size: 4 * MIB as u64,
        ..InitRequest::default()
    };

    let run = |request: &InitRequest| {
        let (tx, rx) = std::sync::mpsc::channel();
        perform_disk_initialization(&path, request, tx);
        let mut steps = 0;
        let mut result = None;
        for msg in rx {
            match msg {
                BootProgress::Step(_) => steps += 1,
                BootProgress::Progress(p) => assert!(p <= 100),
                BootProgress::Finished(r) => result = Some(r),
            }
        }
        (steps, result.expect("finished message"))
    };

    let (steps, fs) = run(&request);
    let mut fs = fs.unwrap();
    assert!(steps >= 3);
    assert!(fs.disk().offset() > 0);
    fs.alloc_inode(FileType::Directory).unwrap();
    fs.unmount().unwrap();

    // second boot mounts without formatting
    let (_, fs) = run(&request);
    let fs = fs.unwrap();
    assert_eq!(fs.super_block().free_inodes, fs.super_block().total_inodes - 1);
    drop(fs);

    // forced format wipes it
    let forced = InitRequest {
        force_format: true,
        ..request.clone()
    };
    let (_, fs) = run(&forced);
    let fs = fs.unwrap();
    assert_eq!(fs.super_block().free_inodes, fs.super_block().total_inodes);
    drop(fs);

    std::fs::remove_file(&path).unwrap();
}

/// Re-encodes the primary header (fresh CRC) after `edit`, and wipes the backup
/// so the reader cannot fall back to it.
fn tamper_primary(disk: &RamDisk, edit: impl FnOnce(&mut GptHeader)) {
    let mut sector = [0u8; 512];
    disk.read_at(SECTOR_SIZE, &mut sector).unwrap();
    let mut header = GptHeader::decode(&sector).unwrap();
    edit(&mut header);
    disk.write_at(SECTOR_SIZE, &header.encode()).unwrap();
    disk.write_at((TOTAL_LBA - 1) * SECTOR_SIZE, &[0u8; 512]).unwrap();
}

fn assert_rejected(disk: &RamDisk) {
    assert!(matches!(
        read_partition_table(disk),
        Err(FileSystemError::InvalidPartitionTable(_))
    ));
}

#[test]
fn huge_entry_lba_is_rejected() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();

    let mut sector = [0u8; 512];
    disk.read_at(SECTOR_SIZE, &mut sector).unwrap();
    let mut header = GptHeader::decode(&sector).unwrap();
    header.partition_entry_lba = u64::MAX - 3;
    disk.write_at(SECTOR_SIZE, &header.encode()).unwrap();

    // backup still valid
    let read = read_partition_table(&disk).unwrap();
    assert_eq!(read.header.my_lba, TOTAL_LBA - 1);
    assert_eq!(read.partition, table.partition);

    tamper_primary(&disk, |h| h.partition_entry_lba = u64::MAX - 3);
    assert_rejected(&disk);
}

#[test]
fn partition_over_the_header_is_rejected() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();

    // entry array describing a partition that starts on the header itself
    let mut entry = table.partition.clone();
    entry.first_lba = 1;
    let mut entries = vec![0u8; 128 * 128];
    entries[..128].copy_from_slice(&entry.encode());
    disk.write_at(2 * SECTOR_SIZE, &entries).unwrap();

    tamper_primary(&disk, |h| {
        h.first_usable_lba = 0;
        h.entries_crc32 = crc32fast::hash(&entries);
    });
    assert_rejected(&disk);

    // no valid table left, the device is used whole
    let volume = open_volume(disk).unwrap();
    assert_eq!(volume.offset(), 0);
}

#[test]
fn usable_range_into_primary_entries_is_rejected() {
    let disk = RamDisk::new(DISK);
    write_partition_table(&disk, "SGFS").unwrap();
    tamper_primary(&disk, |h| h.first_usable_lba = 20);
    assert_rejected(&disk);
}

#[test]
fn usable_range_into_backup_entries_is_rejected() {
    let disk = RamDisk::new(DISK);
    write_partition_table(&disk, "SGFS").unwrap();
    tamper_primary(&disk, |h| h.last_usable_lba = TOTAL_LBA - 2);
    assert_rejected(&disk);
}

#[test]
fn entry_array_inside_usable_range_is_rejected() {
    let disk = RamDisk::new(DISK);
    write_partition_table(&disk, "SGFS").unwrap();

    // identical array copy so only the placement is wrong
    let mut entries = vec![0u8; 128 * 128];
    disk.read_at(2 * SECTOR_SIZE, &mut entries).unwrap();
    disk.write_at(100 * SECTOR_SIZE, &entries).unwrap();

    tamper_primary(&disk, |h| h.partition_entry_lba = 100);
    assert_rejected(&disk);
}

#[test]
fn tampering_helper_keeps_a_valid_table_valid() {
    let disk = RamDisk::new(DISK);
    let table = write_partition_table(&disk, "SGFS").unwrap();
    tamper_primary(&disk, |_| {});
    assert_eq!(read_partition_table(&disk).unwrap(), table);
}

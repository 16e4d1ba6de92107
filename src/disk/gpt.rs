//! GPT 分区表：保护性 MBR + 主表头（LBA 1）+ 表项数组（LBA 2..34）
//! + 备份表项数组 + 备份表头（最后一个 LBA）。只支持单分区。

use uuid::Uuid;

use crate::{
    disk::{block_device::BlockDevice, types::SECTOR_SIZE},
    fs::error::{FileSystemError, Result},
    utils::generate_guid,
};

pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;
pub const GPT_HEADER_SIZE: u32 = 92;
pub const GPT_ENTRY_COUNT: u32 = 128;
pub const GPT_ENTRY_SIZE: u32 = 128;

/// 表项数组占用的扇区数：128 * 128 / 512 = 32
pub const GPT_ENTRY_ARRAY_SECTORS: u64 =
    (GPT_ENTRY_COUNT as u64 * GPT_ENTRY_SIZE as u64) / SECTOR_SIZE;

/// 保护性 MBR + 表头 + 表项数组 = 34 个 LBA
pub const GPT_RESERVED_LBAS: u64 = 2 + GPT_ENTRY_ARRAY_SECTORS;

/// Linux filesystem data
pub const SGFS_PARTITION_TYPE: Uuid = Uuid::from_u128(0x0FC6_3DAF_8483_4772_8E79_3D69_D847_7DE4);

const ENTRY_NAME_UNITS: usize = 36;
const MBR_PROTECTIVE_TYPE: u8 = 0xEE;

fn invalid(msg: impl Into<String>) -> FileSystemError {
    FileSystemError::InvalidPartitionTable(msg.into())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn read_guid(buf: &[u8], off: usize) -> Uuid {
    let mut b = [0u8; 16];
    b.copy_from_slice(&buf[off..off + 16]);
    Uuid::from_bytes_le(b)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub partition_entry_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
    pub entries_crc32: u32,
}

impl GptHeader {
    /// 编码为一个完整扇区，header CRC 在这里计算
    pub fn encode(&self) -> [u8; SECTOR_SIZE as usize] {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[0..8].copy_from_slice(&GPT_SIGNATURE);
        sector[8..12].copy_from_slice(&GPT_REVISION.to_le_bytes());
        sector[12..16].copy_from_slice(&GPT_HEADER_SIZE.to_le_bytes());
        // 16..20 header CRC，计算时必须为 0；20..24 保留
        sector[24..32].copy_from_slice(&self.my_lba.to_le_bytes());
        sector[32..40].copy_from_slice(&self.alternate_lba.to_le_bytes());
        sector[40..48].copy_from_slice(&self.first_usable_lba.to_le_bytes());
        sector[48..56].copy_from_slice(&self.last_usable_lba.to_le_bytes());
        sector[56..72].copy_from_slice(&self.disk_guid.to_bytes_le());
        sector[72..80].copy_from_slice(&self.partition_entry_lba.to_le_bytes());
        sector[80..84].copy_from_slice(&self.num_entries.to_le_bytes());
        sector[84..88].copy_from_slice(&self.entry_size.to_le_bytes());
        sector[88..92].copy_from_slice(&self.entries_crc32.to_le_bytes());

        let crc = crc32fast::hash(&sector[..GPT_HEADER_SIZE as usize]);
        sector[16..20].copy_from_slice(&crc.to_le_bytes());
        sector
    }

    /// 校验签名、版本、头长度与 header CRC 后解析
    pub fn decode(sector: &[u8]) -> Result<Self> {
        if sector.len() < GPT_HEADER_SIZE as usize {
            return Err(invalid("header sector too short"));
        }
        if sector[0..8] != GPT_SIGNATURE {
            return Err(invalid("missing 'EFI PART' signature"));
        }
        let revision = read_u32(sector, 8);
        if revision != GPT_REVISION {
            return Err(invalid(format!("unsupported revision {:#010x}", revision)));
        }
        let header_size = read_u32(sector, 12) as usize;
        if header_size < GPT_HEADER_SIZE as usize || header_size > sector.len() {
            return Err(invalid(format!("bad header size {}", header_size)));
        }

        let stored_crc = read_u32(sector, 16);
        let mut copy = sector[..header_size].to_vec();
        copy[16..20].fill(0);
        if crc32fast::hash(&copy) != stored_crc {
            return Err(invalid("header CRC mismatch"));
        }

        Ok(Self {
            my_lba: read_u64(sector, 24),
            alternate_lba: read_u64(sector, 32),
            first_usable_lba: read_u64(sector, 40),
            last_usable_lba: read_u64(sector, 48),
            disk_guid: read_guid(sector, 56),
            partition_entry_lba: read_u64(sector, 72),
            num_entries: read_u32(sector, 80),
            entry_size: read_u32(sector, 84),
            entries_crc32: read_u32(sector, 88),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptPartitionEntry {
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub first_lba: u64, // 含
    pub last_lba: u64,  // 含
    pub attributes: u64,
    pub name: String, // UTF-16LE，最多 36 个码元
}

impl GptPartitionEntry {
    pub fn encode(&self) -> [u8; GPT_ENTRY_SIZE as usize] {
        let mut raw = [0u8; GPT_ENTRY_SIZE as usize];
        raw[0..16].copy_from_slice(&self.type_guid.to_bytes_le());
        raw[16..32].copy_from_slice(&self.unique_guid.to_bytes_le());
        raw[32..40].copy_from_slice(&self.first_lba.to_le_bytes());
        raw[40..48].copy_from_slice(&self.last_lba.to_le_bytes());
        raw[48..56].copy_from_slice(&self.attributes.to_le_bytes());
        for (i, unit) in self.name.encode_utf16().take(ENTRY_NAME_UNITS).enumerate() {
            let off = 56 + i * 2;
            raw[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    pub fn decode(raw: &[u8]) -> Self {
        let units: Vec<u16> = raw[56..56 + ENTRY_NAME_UNITS * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();

        Self {
            type_guid: read_guid(raw, 0),
            unique_guid: read_guid(raw, 16),
            first_lba: read_u64(raw, 32),
            last_lba: read_u64(raw, 40),
            attributes: read_u64(raw, 48),
            name: String::from_utf16_lossy(&units),
        }
    }

    pub fn is_unused(&self) -> bool {
        self.type_guid.is_nil()
    }

    /// 分区占用的扇区数
    pub fn sectors(&self) -> u64 {
        self.last_lba - self.first_lba + 1
    }
}

/// 读回或刚写入的分区表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub header: GptHeader,
    pub partition: GptPartitionEntry,
}

impl PartitionTable {
    pub fn partition(&self) -> &GptPartitionEntry {
        &self.partition
    }
}

/// 保护性 MBR：一条 0xEE 类型的分区记录覆盖整个磁盘
pub fn protective_mbr(total_lba: u64) -> [u8; SECTOR_SIZE as usize] {
    let mut mbr = [0u8; SECTOR_SIZE as usize];
    let record = &mut mbr[446..462];
    record[0] = 0x00; // 非引导
    record[1..4].copy_from_slice(&[0x00, 0x02, 0x00]); // 起始 CHS
    record[4] = MBR_PROTECTIVE_TYPE;
    record[5..8].copy_from_slice(&[0xFF, 0xFF, 0xFF]); // 结束 CHS
    record[8..12].copy_from_slice(&1u32.to_le_bytes());
    let size = u32::try_from(total_lba - 1).unwrap_or(u32::MAX);
    record[12..16].copy_from_slice(&size.to_le_bytes());
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    mbr
}

fn total_lbas<D: BlockDevice + ?Sized>(device: &D) -> Result<u64> {
    let total_lba = device.size()? / SECTOR_SIZE;
    if total_lba < 2 * GPT_RESERVED_LBAS {
        return Err(FileSystemError::InvalidGeometry(format!(
            "device has {} sectors, a GPT disk needs at least {}",
            total_lba,
            2 * GPT_RESERVED_LBAS
        )));
    }
    Ok(total_lba)
}

/// 写入一张只含单个分区 `[34, total_lba - 34]` 的 GPT。
///
/// 写入顺序：保护性 MBR、备份表项、备份表头、主表项、主表头，最后 flush。
/// 任何一步失败都需要调用者重新初始化整块磁盘。
pub fn write_partition_table<D: BlockDevice + ?Sized>(
    device: &D,
    name: &str,
) -> Result<PartitionTable> {
    let total_lba = total_lbas(device)?;
    let last_lba = total_lba - 1;
    let first_usable_lba = GPT_RESERVED_LBAS;
    let last_usable_lba = total_lba - GPT_RESERVED_LBAS;

    let partition = GptPartitionEntry {
        type_guid: SGFS_PARTITION_TYPE,
        unique_guid: generate_guid(),
        first_lba: first_usable_lba,
        last_lba: last_usable_lba,
        attributes: 0,
        name: name.to_string(),
    };

    let mut entries = vec![0u8; (GPT_ENTRY_COUNT * GPT_ENTRY_SIZE) as usize];
    entries[..GPT_ENTRY_SIZE as usize].copy_from_slice(&partition.encode());
    let entries_crc32 = crc32fast::hash(&entries);

    let primary = GptHeader {
        my_lba: 1,
        alternate_lba: last_lba,
        first_usable_lba,
        last_usable_lba,
        disk_guid: generate_guid(),
        partition_entry_lba: 2,
        num_entries: GPT_ENTRY_COUNT,
        entry_size: GPT_ENTRY_SIZE,
        entries_crc32,
    };
    let backup = GptHeader {
        my_lba: last_lba,
        alternate_lba: 1,
        partition_entry_lba: last_lba - GPT_ENTRY_ARRAY_SECTORS,
        ..primary.clone()
    };

    device.write_at(0, &protective_mbr(total_lba))?;
    device.write_at(backup.partition_entry_lba * SECTOR_SIZE, &entries)?;
    device.write_at(backup.my_lba * SECTOR_SIZE, &backup.encode())?;
    device.write_at(primary.partition_entry_lba * SECTOR_SIZE, &entries)?;
    device.write_at(primary.my_lba * SECTOR_SIZE, &primary.encode())?;
    device.flush()?;

    Ok(PartitionTable {
        header: primary,
        partition,
    })
}

/// 读取并校验分区表，主表头损坏时退回备份表头
pub fn read_partition_table<D: BlockDevice + ?Sized>(device: &D) -> Result<PartitionTable> {
    let total_lba = total_lbas(device)?;

    match read_table_at(device, 1, total_lba) {
        Err(primary_err @ FileSystemError::InvalidPartitionTable(_)) => {
            read_table_at(device, total_lba - 1, total_lba).map_err(|_| primary_err)
        }
        other => other,
    }
}

fn read_table_at<D: BlockDevice + ?Sized>(
    device: &D,
    lba: u64,
    total_lba: u64,
) -> Result<PartitionTable> {
    let mut sector = [0u8; SECTOR_SIZE as usize];
    let header_offset = lba
        .checked_mul(SECTOR_SIZE)
        .ok_or_else(|| invalid(format!("header LBA {} lies outside the device", lba)))?;
    device.read_at(header_offset, &mut sector)?;
    let header = GptHeader::decode(&sector)?;

    if header.my_lba != lba {
        return Err(invalid(format!(
            "header at LBA {} claims to live at LBA {}",
            lba, header.my_lba
        )));
    }
    if header.entry_size != GPT_ENTRY_SIZE || header.num_entries == 0 {
        return Err(invalid(format!(
            "unsupported entry array geometry {} x {}",
            header.num_entries, header.entry_size
        )));
    }

    // 可用区必须夹在主表项数组之后、备份表项数组之前
    let backup_array_lba = total_lba - 1 - GPT_ENTRY_ARRAY_SECTORS;
    if header.first_usable_lba < GPT_RESERVED_LBAS
        || header.first_usable_lba > header.last_usable_lba
        || header.last_usable_lba >= backup_array_lba
    {
        return Err(invalid(format!(
            "usable range [{}, {}] overlaps the partition table",
            header.first_usable_lba, header.last_usable_lba
        )));
    }

    let array_bytes = header.num_entries as u64 * header.entry_size as u64;
    let array_sectors = array_bytes.div_ceil(SECTOR_SIZE);
    let array_end = header
        .partition_entry_lba
        .checked_add(array_sectors)
        .filter(|&end| end <= total_lba)
        .ok_or_else(|| invalid("entry array lies outside the device"))?;
    if header.partition_entry_lba <= header.last_usable_lba && array_end > header.first_usable_lba
    {
        return Err(invalid("entry array overlaps the usable range"));
    }

    let mut entries = vec![0u8; array_bytes as usize];
    // array_end <= total_lba，乘法不会溢出
    device.read_at(header.partition_entry_lba * SECTOR_SIZE, &mut entries)?;
    if crc32fast::hash(&entries) != header.entries_crc32 {
        return Err(invalid("entry array CRC mismatch"));
    }

    let partition = entries
        .chunks_exact(header.entry_size as usize)
        .map(GptPartitionEntry::decode)
        .find(|e| !e.is_unused())
        .ok_or_else(|| invalid("no partition entry"))?;

    if partition.first_lba > partition.last_lba
        || partition.first_lba < header.first_usable_lba
        || partition.last_lba > header.last_usable_lba
    {
        return Err(invalid(format!(
            "partition [{}, {}] escapes the usable range [{}, {}]",
            partition.first_lba,
            partition.last_lba,
            header.first_usable_lba,
            header.last_usable_lba
        )));
    }

    Ok(PartitionTable { header, partition })
}

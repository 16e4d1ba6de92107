use chrono::{TimeZone, Utc};
use uuid::Uuid;

/// 当前时间（Unix 秒），超出 u32 范围时饱和
pub fn current_timestamp() -> u32 {
    u32::try_from(Utc::now().timestamp().max(0)).unwrap_or(u32::MAX)
}

/// 生成一个随机 GUID（GPT 磁盘 / 分区标识）
pub fn generate_guid() -> Uuid {
    Uuid::new_v4()
}

/// 把 inode 时间戳格式化成可读字符串
pub fn format_timestamp(secs: u32) -> String {
    match Utc.timestamp_opt(secs as i64, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

//! 毫秒精度时间工具。时间轮内部一律使用 Unix 毫秒时间戳。

use chrono::{DateTime, TimeZone, Utc};

/// 当前 Unix 毫秒时间戳
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// DateTime 转毫秒时间戳
pub fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// 毫秒时间戳转 DateTime，越界时退化为当前时间
pub fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(t) => t,
        _ => Utc::now(),
    }
}

/// 向下对齐到 m 的整数倍。m <= 0 时原样返回。
pub fn truncate(x: i64, m: i64) -> i64 {
    if m <= 0 {
        return x;
    }
    x - x % m
}

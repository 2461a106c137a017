//! 定时表达式子集。
//!
//! 只接受 6 字段表达式 `sec min hour day month week`，且前四个字段
//! 恰有一个是 `*/N`，其余字段按兼容模式填写（被匹配字段之前为 0，
//! 之后为 *）。解析结果是单一的固定间隔。

use std::time::Duration;

use delayq_errors::{DispatcherError, DispatcherResult};

/// 前四个字段对应的时间单位（秒）
const UNIT_SECONDS: [u64; 4] = [1, 60, 3600, 86400];

/// 把受支持的定时表达式翻译为固定间隔
pub fn cron_to_duration(expr: &str) -> DispatcherResult<Duration> {
    let invalid = |message: &str| DispatcherError::InvalidCron {
        expr: expr.to_string(),
        message: message.to_string(),
    };

    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(invalid("必须为 6 个字段 (sec min hour day month week)"));
    }

    let mut matched: Option<(usize, u64)> = None;
    for (idx, part) in parts.iter().take(4).enumerate() {
        if let Some(n) = part.strip_prefix("*/") {
            if matched.is_some() {
                return Err(invalid("前四个字段只允许一个 */N"));
            }
            let n: u64 = n
                .parse()
                .map_err(|_| invalid("*/N 中的 N 必须是正整数"))?;
            if n == 0 {
                return Err(invalid("*/N 中的 N 必须是正整数"));
            }
            matched = Some((idx, n));
        }
    }

    let Some((idx, n)) = matched else {
        return Err(invalid("不支持的定时间隔表达式"));
    };

    // 被匹配字段之前必须为 0，之后（含月、周）必须为 *
    for (i, part) in parts.iter().enumerate() {
        if i == idx {
            continue;
        }
        if i < idx {
            if *part != "0" {
                return Err(invalid("不支持的定时间隔表达式"));
            }
        } else if *part != "*" {
            return Err(invalid("不支持的定时间隔表达式"));
        }
    }

    Ok(Duration::from_secs(n * UNIT_SECONDS[idx]))
}

//! trace_id 透传工具。
//!
//! trace_id 是一个不透明字符串，随任务写入 extra 列，贯穿
//! 注册、扫表、入轮、回调的全链路，并出现在每条相关日志上。
//! 定时或重试唤醒时在父 id 后追加子 id，形如 `parent,child`。

use uuid::Uuid;

/// 生成一个新的 trace_id（去掉连字符的 UUID）
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 在已有 trace_id 后追加子 id。任一侧为空时返回另一侧。
pub fn append(parent: &str, child: &str) -> String {
    if child.is_empty() {
        return parent.to_string();
    }
    if parent.is_empty() {
        return child.to_string();
    }
    format!("{parent},{child}")
}

//! 系统常量定义

/// 系统名称
pub const SYSTEM_NAME: &str = "delayq";

/// 队列表名
pub const TASK_QUEUE_TABLE: &str = "task_queue";

/// 回调成功的约定响应串。
/// 适配器返回其他任何内容（即使传输层成功）都视为业务失败。
pub const CALLBACK_SUCCESS: &str = "SUCCESS";

/// 回调载荷中注入的关联字段名，值为 {msg_no, trace_id}
pub const PAYLOAD_ORIGINAL_KEY: &str = "original";

/// 后台错误通道容量，写满后丢弃并记录日志
pub const ERROR_CHANNEL_CAPACITY: usize = 100;

/// 默认延迟秒数
pub const DEFAULT_DELAY_TIME: i64 = 5;
/// 默认单次执行超时秒数
pub const DEFAULT_TIMEOUT: i64 = 3;
/// 默认退避序列（秒）
pub const DEFAULT_BACKOFF: [i64; 3] = [5, 10, 30];
/// 默认回调 schema
pub const DEFAULT_SCHEMA: &str = "FMT";

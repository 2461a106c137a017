//! # delayq-common
//!
//! 延迟任务调度系统的共享工具和常量模块
//!
//! 本模块提供：
//! - 系统常量定义
//! - 毫秒精度时间工具
//! - trace_id 透传工具
//! - 雪花算法任务号生成器
//! - 节点归属区间类型

pub mod constants;
pub mod range;
pub mod snowflake;
pub mod time;
pub mod trace;

pub use constants::*;
pub use range::OwnershipRange;
pub use snowflake::SnowflakeNode;

pub use delayq_errors::{DispatcherError, DispatcherResult};

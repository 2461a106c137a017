//! 延迟任务调度核心。
//!
//! `Dispatcher` 把持久化任务队列和分层时间轮粘合起来：注册时决定
//! 快慢路径，慢路径交给周期性扫表认领；触发时经 schema 选中的
//! 回调适配器执行一次尝试，按退避序列驱动重试状态机直到成功、
//! 失败或重试耗尽。

pub mod callback;
pub mod cron;
pub mod dispatcher;

pub use callback::{AdapterRegistry, Callback, FmtCallback, GrpcCallback, HttpCallback};
pub use cron::cron_to_duration;
pub use dispatcher::Dispatcher;

pub use delayq_errors::{DispatcherError, DispatcherResult};

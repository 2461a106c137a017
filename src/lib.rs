//! delayq
//!
//! 基于分层时间轮的分布式延迟任务调度系统。客户端注册带延迟或
//! 定时间隔的任务，调度器把任务持久化到关系型队列表，在到期时
//! 经可插拔的回调传输执行，并按退避序列驱动重试，直到成功或
//! 重试耗尽。多节点部署按 StatefulSet Pod 序号分片认领任务。

pub mod app;

pub use app::App;

pub use delayq_cluster::{resolve_range, StatefulSetMembers};
pub use delayq_common::{trace, OwnershipRange, SnowflakeNode};
pub use delayq_config::{init_logging, AppConfig, DispatcherConfig};
pub use delayq_dispatcher::{
    cron_to_duration, AdapterRegistry, Callback, Dispatcher, FmtCallback, GrpcCallback,
    HttpCallback,
};
pub use delayq_domain::{
    AddOptions, Extra, FailMsg, FailMsgs, Payload, RegisterReply, RegisterRequest, Task,
    TaskStatus, TaskStore,
};
pub use delayq_errors::{DispatcherError, DispatcherResult};
pub use delayq_infrastructure::{MemoryTaskStore, PostgresTaskStore};
pub use delayq_timingwheel::{TimingWheel, WheelOptions};

//! 任务存储契约。
//!
//! 存储层只提供行级原语，快慢路径与重试决策都在调度端。所有状态
//! 迁移语句以期望的当前状态做谓词，天然构成乐观并发控制。

use std::time::Duration;

use async_trait::async_trait;

use crate::entities::{Task, TaskStatus};
use delayq_common::OwnershipRange;
use delayq_errors::DispatcherResult;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 持久化一条新任务
    async fn insert(&self, task: &Task) -> DispatcherResult<()>;

    /// 拉取待认领的行：status=PENDING 且 next_run_at 落在
    /// now + lookahead 之内且 locked_by 在本节点区间内，
    /// 按 next_run_at 升序，FOR UPDATE SKIP LOCKED。
    async fn fetch_pending(
        &self,
        limit: i64,
        lookahead: Duration,
        range: OwnershipRange,
    ) -> DispatcherResult<Vec<Task>>;

    /// 拉取超时未完成的行：status=RUNNING 且 run_timeout_at 已过期
    async fn fetch_timeout(&self, limit: i64, range: OwnershipRange) -> DispatcherResult<Vec<Task>>;

    /// RUNNING -> SUCCEEDED
    async fn mark_succeeded(&self, task: &Task) -> DispatcherResult<()>;

    /// RUNNING -> PENDING，写回新的重试簿记字段，等待下轮扫表
    async fn mark_retry_pending(&self, task: &Task) -> DispatcherResult<()>;

    /// 终态 FAILED，写入全部失败记录
    async fn mark_failed(&self, task: &Task) -> DispatcherResult<()>;

    /// from -> RUNNING，写入 fail_count / fail_msgs / next_run_at /
    /// run_timeout_at / last_retry_at。fail_count 为 0 时 last_retry_at
    /// 置空（首次尝试不算重试）。
    async fn mark_running(&self, task: &Task, from: TaskStatus) -> DispatcherResult<()>;

    /// 按任务号查询
    async fn get_by_task_no(&self, task_no: i64) -> DispatcherResult<Option<Task>>;
}

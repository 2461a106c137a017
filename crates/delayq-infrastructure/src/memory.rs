//! 内存任务存储。
//!
//! 与 Postgres 实现保持同样的谓词与迁移语义，用于嵌入式运行和
//! 单元测试，不需要真实数据库连接。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use delayq_common::OwnershipRange;
use delayq_domain::{Task, TaskStatus, TaskStore};
use delayq_errors::{DispatcherError, DispatcherResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试辅助：按任务号读取快照
    pub fn get(&self, task_no: i64) -> Option<Task> {
        self.tasks.lock().unwrap().get(&task_no).cloned()
    }

    /// 测试辅助：全部任务快照
    pub fn all(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }

    /// 测试辅助：直接写入一行，绕过插入校验
    pub fn put(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.task_no, task);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> DispatcherResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(&task.task_no) {
            return Err(DispatcherError::Internal(format!(
                "任务号冲突: {}",
                task.task_no
            )));
        }
        tasks.insert(task.task_no, task.clone());
        Ok(())
    }

    async fn fetch_pending(
        &self,
        limit: i64,
        lookahead: Duration,
        range: OwnershipRange,
    ) -> DispatcherResult<Vec<Task>> {
        let horizon = Utc::now()
            + chrono::Duration::from_std(lookahead)
                .map_err(|e| DispatcherError::Internal(format!("非法的扫表提前量: {e}")))?;
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.next_run_at <= horizon
                    && range.contains(t.locked_by)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.next_run_at);
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn fetch_timeout(&self, limit: i64, range: OwnershipRange) -> DispatcherResult<Vec<Task>> {
        let now = Utc::now();
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.run_timeout_at <= now
                    && range.contains(t.locked_by)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.run_timeout_at);
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn mark_succeeded(&self, task: &Task) -> DispatcherResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(row) = tasks.get_mut(&task.task_no) {
            if row.status == TaskStatus::Running {
                row.status = TaskStatus::Succeeded;
                row.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_retry_pending(&self, task: &Task) -> DispatcherResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(row) = tasks.get_mut(&task.task_no) {
            if row.status == TaskStatus::Running {
                let now = Utc::now();
                row.status = TaskStatus::Pending;
                row.fail_count = task.fail_count;
                row.fail_msgs = task.fail_msgs.clone();
                row.next_run_at = task.next_run_at;
                row.run_timeout_at = task.run_timeout_at;
                row.last_retry_at = Some(now);
                row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, task: &Task) -> DispatcherResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(row) = tasks.get_mut(&task.task_no) {
            row.status = TaskStatus::Failed;
            row.fail_msgs = task.fail_msgs.clone();
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_running(&self, task: &Task, from: TaskStatus) -> DispatcherResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(row) = tasks.get_mut(&task.task_no) {
            if row.status == from {
                let now = Utc::now();
                row.status = TaskStatus::Running;
                row.fail_count = task.fail_count;
                row.fail_msgs = task.fail_msgs.clone();
                row.next_run_at = task.next_run_at;
                row.run_timeout_at = task.run_timeout_at;
                row.last_retry_at = if task.fail_count == 0 { None } else { Some(now) };
                row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn get_by_task_no(&self, task_no: i64) -> DispatcherResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&task_no).cloned())
    }
}

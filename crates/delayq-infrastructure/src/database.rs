//! Postgres 任务存储。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use delayq_common::OwnershipRange;
use delayq_config::DatabaseConfig;
use delayq_domain::{FailMsgs, Payload, Task, TaskStatus, TaskStore};
use delayq_errors::{DispatcherError, DispatcherResult};

/// 按配置建立连接池
pub async fn connect(cfg: &DatabaseConfig) -> DispatcherResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_open)
        .min_connections(cfg.max_idle)
        .max_lifetime(cfg.conn_max_lifetime())
        .idle_timeout(cfg.conn_max_idle_time())
        .connect(&cfg.url)
        .await?;
    Ok(pool)
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS task_queue (
        id             BIGSERIAL PRIMARY KEY,
        task_no        BIGINT NOT NULL,
        payload        JSONB NOT NULL DEFAULT '{}',
        delay_time     BIGINT NOT NULL DEFAULT 0,
        timeout        BIGINT NOT NULL DEFAULT 0,
        backoff        JSONB NOT NULL DEFAULT '[]',
        cron_expr      VARCHAR(64) NOT NULL DEFAULT '',
        status         SMALLINT NOT NULL DEFAULT 0,
        next_run_at    TIMESTAMPTZ NOT NULL,
        run_timeout_at TIMESTAMPTZ NOT NULL,
        fail_count     INT NOT NULL DEFAULT -1,
        last_retry_at  TIMESTAMPTZ,
        locked_by      BIGINT NOT NULL DEFAULT 0,
        fail_msgs      JSONB NOT NULL DEFAULT '[]',
        extra          JSONB NOT NULL DEFAULT '{}',
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uk_task_queue_task_no ON task_queue (task_no)",
    "CREATE INDEX IF NOT EXISTS idx_task_queue_status_next_run ON task_queue (status, next_run_at)",
    "CREATE INDEX IF NOT EXISTS idx_task_queue_status_run_timeout ON task_queue (status, run_timeout_at)",
];

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表与索引，幂等
    pub async fn ensure_schema(&self) -> DispatcherResult<()> {
        for stmt in SCHEMA_STATEMENTS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> DispatcherResult<Task> {
        let payload: serde_json::Value = row.try_get("payload")?;
        let backoff: serde_json::Value = row.try_get("backoff")?;
        let fail_msgs: serde_json::Value = row.try_get("fail_msgs")?;
        let extra: serde_json::Value = row.try_get("extra")?;
        Ok(Task {
            id: row.try_get("id")?,
            task_no: row.try_get("task_no")?,
            payload: serde_json::from_value::<Payload>(payload)?,
            delay_time: row.try_get("delay_time")?,
            timeout: row.try_get("timeout")?,
            backoff: serde_json::from_value(backoff)?,
            cron_expr: row.try_get("cron_expr")?,
            status: row.try_get("status")?,
            next_run_at: row.try_get("next_run_at")?,
            run_timeout_at: row.try_get("run_timeout_at")?,
            fail_count: row.try_get("fail_count")?,
            last_retry_at: row.try_get("last_retry_at")?,
            locked_by: row.try_get("locked_by")?,
            fail_msgs: serde_json::from_value::<FailMsgs>(fail_msgs)?,
            extra: serde_json::from_value(extra)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn retry_columns(
        task: &Task,
        now: DateTime<Utc>,
    ) -> DispatcherResult<(serde_json::Value, Option<DateTime<Utc>>)> {
        let fail_msgs = serde_json::to_value(&task.fail_msgs)?;
        // 首次尝试不算重试
        let last_retry_at = if task.fail_count == 0 { None } else { Some(now) };
        Ok((fail_msgs, last_retry_at))
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &Task) -> DispatcherResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_queue
            (task_no, payload, delay_time, timeout, backoff, cron_expr, status,
             next_run_at, run_timeout_at, fail_count, locked_by, fail_msgs, extra,
             created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(task.task_no)
        .bind(serde_json::to_value(&task.payload)?)
        .bind(task.delay_time)
        .bind(task.timeout)
        .bind(serde_json::to_value(&task.backoff)?)
        .bind(&task.cron_expr)
        .bind(task.status)
        .bind(task.next_run_at)
        .bind(task.run_timeout_at)
        .bind(task.fail_count)
        .bind(task.locked_by)
        .bind(serde_json::to_value(&task.fail_msgs)?)
        .bind(serde_json::to_value(&task.extra)?)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        debug!(task_no = task.task_no, "任务已入库");
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
        // 真正的互斥来自 locked_by 分片；SKIP LOCKED 只是避免
        // 同节点并发扫表时互相等待
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_queue
            WHERE status = 0 AND next_run_at <= $1 AND locked_by > $2 AND locked_by <= $3
            ORDER BY next_run_at ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(horizon)
        .bind(range.lo)
        .bind(range.hi)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn fetch_timeout(&self, limit: i64, range: OwnershipRange) -> DispatcherResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_queue
            WHERE status = 1 AND run_timeout_at <= $1 AND locked_by > $2 AND locked_by <= $3
            ORDER BY run_timeout_at ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(Utc::now())
        .bind(range.lo)
        .bind(range.hi)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn mark_succeeded(&self, task: &Task) -> DispatcherResult<()> {
        sqlx::query(
            "UPDATE task_queue SET status = 2, updated_at = $1 WHERE task_no = $2 AND status = 1",
        )
        .bind(Utc::now())
        .bind(task.task_no)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry_pending(&self, task: &Task) -> DispatcherResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE task_queue
            SET status = 0, fail_count = $1, fail_msgs = $2, next_run_at = $3,
                run_timeout_at = $4, last_retry_at = $5, updated_at = $6
            WHERE task_no = $7 AND status = 1
            "#,
        )
        .bind(task.fail_count)
        .bind(serde_json::to_value(&task.fail_msgs)?)
        .bind(task.next_run_at)
        .bind(task.run_timeout_at)
        .bind(now)
        .bind(now)
        .bind(task.task_no)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, task: &Task) -> DispatcherResult<()> {
        sqlx::query(
            "UPDATE task_queue SET status = 3, fail_msgs = $1, updated_at = $2 WHERE task_no = $3",
        )
        .bind(serde_json::to_value(&task.fail_msgs)?)
        .bind(Utc::now())
        .bind(task.task_no)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_running(&self, task: &Task, from: TaskStatus) -> DispatcherResult<()> {
        let now = Utc::now();
        let (fail_msgs, last_retry_at) = Self::retry_columns(task, now)?;
        sqlx::query(
            r#"
            UPDATE task_queue
            SET status = 1, fail_count = $1, fail_msgs = $2, next_run_at = $3,
                run_timeout_at = $4, last_retry_at = $5, updated_at = $6
            WHERE task_no = $7 AND status = $8
            "#,
        )
        .bind(task.fail_count)
        .bind(fail_msgs)
        .bind(task.next_run_at)
        .bind(task.run_timeout_at)
        .bind(last_retry_at)
        .bind(now)
        .bind(task.task_no)
        .bind(from)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_task_no(&self, task_no: i64) -> DispatcherResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM task_queue WHERE task_no = $1")
            .bind(task_no)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }
}

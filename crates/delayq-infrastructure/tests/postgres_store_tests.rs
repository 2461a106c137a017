//! Postgres 集成测试。
//!
//! 需要通过 TEST_DATABASE_URL 指向一个可用的 Postgres 实例，
//! 未设置时静默跳过。

use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use delayq_common::OwnershipRange;
use delayq_domain::{Extra, FailMsg, FailMsgs, Payload, Task, TaskStatus, TaskStore};
use delayq_infrastructure::PostgresTaskStore;

async fn test_store() -> Option<PostgresTaskStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("连接测试数据库失败");
    let store = PostgresTaskStore::new(pool);
    store.ensure_schema().await.expect("建表失败");
    Some(store)
}

fn sample_task(task_no: i64, locked_by: i64, in_secs: i64) -> Task {
    let now = Utc::now();
    let mut data = Map::new();
    data.insert("result".to_string(), Value::String("SUCCESS".to_string()));
    Task {
        id: 0,
        task_no,
        payload: Payload {
            schema: "FMT".to_string(),
            url: String::new(),
            path: String::new(),
            data,
        },
        delay_time: in_secs,
        timeout: 3,
        backoff: vec![2, 16],
        cron_expr: String::new(),
        status: TaskStatus::Pending,
        next_run_at: now + chrono::Duration::seconds(in_secs),
        run_timeout_at: now + chrono::Duration::seconds(in_secs + 3),
        fail_count: -1,
        last_retry_at: None,
        locked_by,
        fail_msgs: FailMsgs::default(),
        extra: Extra {
            trace_id: "pg-test".to_string(),
        },
        created_at: now,
        updated_at: now,
    }
}

fn unique_no() -> i64 {
    // 测试之间不清表，任务号取时间戳保证互不冲突
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

#[tokio::test]
async fn test_insert_and_get_roundtrip() {
    let Some(store) = test_store().await else {
        eprintln!("TEST_DATABASE_URL 未设置，跳过");
        return;
    };
    let task = sample_task(unique_no(), 0, 30);
    store.insert(&task).await.unwrap();

    let row = store.get_by_task_no(task.task_no).await.unwrap().unwrap();
    assert_eq!(row.task_no, task.task_no);
    assert_eq!(row.status, TaskStatus::Pending);
    assert_eq!(row.fail_count, -1);
    assert_eq!(row.backoff, vec![2, 16]);
    assert_eq!(row.payload.schema, "FMT");
    assert_eq!(row.extra.trace_id, "pg-test");
    assert!(row.id > 0);
}

#[tokio::test]
async fn test_fetch_pending_respects_range() {
    let Some(store) = test_store().await else {
        eprintln!("TEST_DATABASE_URL 未设置，跳过");
        return;
    };
    let mine = sample_task(unique_no(), 7_000_001, 0);
    let other = sample_task(unique_no(), 7_000_002, 0);
    store.insert(&mine).await.unwrap();
    store.insert(&other).await.unwrap();

    let range = OwnershipRange::new(7_000_000, 7_000_001);
    let got = store
        .fetch_pending(100, Duration::from_secs(10), range)
        .await
        .unwrap();
    let nos: Vec<i64> = got.iter().map(|t| t.task_no).collect();
    assert!(nos.contains(&mine.task_no));
    assert!(!nos.contains(&other.task_no));
}

#[tokio::test]
async fn test_status_transitions() {
    let Some(store) = test_store().await else {
        eprintln!("TEST_DATABASE_URL 未设置，跳过");
        return;
    };
    let mut task = sample_task(unique_no(), 0, 0);
    store.insert(&task).await.unwrap();

    // PENDING -> RUNNING
    task.fail_count = 0;
    store.mark_running(&task, TaskStatus::Pending).await.unwrap();
    let row = store.get_by_task_no(task.task_no).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Running);
    assert_eq!(row.fail_count, 0);
    assert!(row.last_retry_at.is_none());

    // RUNNING -> PENDING（重试写回）
    task.push_fail_msg(FailMsg {
        resp: "FAIL".to_string(),
        err: String::new(),
    });
    task.fail_count = 0;
    task.next_run_at = Utc::now() + chrono::Duration::seconds(30);
    task.run_timeout_at = task.next_run_at + chrono::Duration::seconds(3);
    store.mark_retry_pending(&task).await.unwrap();
    let row = store.get_by_task_no(task.task_no).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Pending);
    assert_eq!(row.fail_msgs.len(), 1);
    assert!(row.last_retry_at.is_some());

    // 再次认领并成功
    task.fail_count = 1;
    store.mark_running(&task, TaskStatus::Pending).await.unwrap();
    store.mark_succeeded(&task).await.unwrap();
    let row = store.get_by_task_no(task.task_no).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Succeeded);

    // 终态后迁移谓词不再命中
    store.mark_running(&task, TaskStatus::Pending).await.unwrap();
    let row = store.get_by_task_no(task.task_no).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_fetch_timeout_returns_expired_running() {
    let Some(store) = test_store().await else {
        eprintln!("TEST_DATABASE_URL 未设置，跳过");
        return;
    };
    let mut task = sample_task(unique_no(), 7_100_001, -10);
    task.status = TaskStatus::Running;
    task.fail_count = 0;
    store.insert(&task).await.unwrap();

    let range = OwnershipRange::new(7_100_000, 7_100_001);
    let got = store.fetch_timeout(100, range).await.unwrap();
    let nos: Vec<i64> = got.iter().map(|t| t.task_no).collect();
    assert!(nos.contains(&task.task_no));

    task.push_fail_msg(FailMsg {
        resp: String::new(),
        err: "task timeout, timeout:3s".to_string(),
    });
    store.mark_failed(&task).await.unwrap();
    let row = store.get_by_task_no(task.task_no).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Failed);
    assert_eq!(row.fail_msgs.len(), 1);
}

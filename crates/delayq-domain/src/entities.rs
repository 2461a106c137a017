//! 领域实体定义
//!
//! 任务队列的核心业务模型。一条任务记录携带回调描述、退避序列与
//! 重试簿记字段，持久化在 task_queue 表中；状态机只在
//! PENDING / RUNNING / SUCCEEDED / FAILED 之间迁移，成功与失败为终态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// 任务状态
// ============================================================================

/// 任务状态，持久化为 SMALLINT。
///
/// - `Pending`: 待执行，等待扫表认领
/// - `Running`: 已入轮，当次尝试进行中
/// - `Succeeded`: 回调成功，终态
/// - `Failed`: 重试耗尽或终止性失败，终态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl TaskStatus {
    pub fn as_i16(&self) -> i16 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Succeeded => 2,
            TaskStatus::Failed => 3,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(TaskStatus::Pending),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Succeeded),
            3 => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

// SQLx 数据库类型支持 - TaskStatus
impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let v = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TaskStatus::from_i16(v).ok_or_else(|| format!("Invalid task status: {v}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode(self.as_i16(), buf)
    }
}

// ============================================================================
// 回调描述
// ============================================================================

/// 回调描述，JSON 持久化在 payload 列。
///
/// `schema` 选择适配器（HTTP/HTTPS/GRPC/FMT），`url` + `path` 定位
/// 目标端点，`data` 为透传给下游的任意键值。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// 单次失败记录，每次失败尝试追加一条
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// 失败记录列表，只追加不修改
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailMsgs(pub Vec<FailMsg>);

impl FailMsgs {
    pub fn append(&mut self, fm: FailMsg) -> &mut Self {
        self.0.push(fm);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 附加信息列，至少携带 trace_id
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Extra {
    #[serde(default)]
    pub trace_id: String,
}

// ============================================================================
// 任务实体
// ============================================================================

/// 一条持久化任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// 全集群唯一的任务号，客户端以此引用任务
    pub task_no: i64,
    pub payload: Payload,
    /// 首次延迟（秒）
    pub delay_time: i64,
    /// 单次尝试超时（秒）
    pub timeout: i64,
    /// 退避序列（秒），长度即最大重试次数
    pub backoff: Vec<i64>,
    /// 定时表达式，空串表示一次性任务
    pub cron_expr: String,
    pub status: TaskStatus,
    pub next_run_at: DateTime<Utc>,
    /// 当次尝试的绝对截止时间，恒为 next_run_at + timeout
    pub run_timeout_at: DateTime<Utc>,
    /// 已失败次数。慢路径插入为 -1，扫表认领时先加一，
    /// 保证认领后 fail_count 等于已发起的尝试数减一。
    pub fail_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    /// 写入节点的序号，创建后不再变更
    pub locked_by: i64,
    pub fail_msgs: FailMsgs,
    pub extra: Extra,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn trace_id(&self) -> &str {
        &self.extra.trace_id
    }

    pub fn push_fail_msg(&mut self, fm: FailMsg) -> &mut Self {
        self.fail_msgs.append(fm);
        self
    }

    /// 当次生效的延迟秒数：重试中取对应退避项，否则取初始延迟
    pub fn current_delay(&self) -> i64 {
        if self.fail_count > 0 {
            if let Some(d) = self.backoff.get(self.fail_count as usize - 1) {
                return *d;
            }
        }
        self.delay_time
    }

    /// 是否已用尽全部重试机会
    pub fn retries_exhausted(&self) -> bool {
        self.fail_count >= 0 && self.fail_count as usize >= self.backoff.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

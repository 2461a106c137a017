use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("任务未找到: {task_no}")]
    TaskNotFound { task_no: i64 },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("未注册的回调适配器: {schema}")]
    AdapterNotFound { schema: String },
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("工作池已满，提交被拒绝")]
    PoolSaturated,
    #[error("时间轮已停止")]
    WheelStopped,
    #[error("回调请求失败: {0}")]
    Callback(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("集群成员信息错误: {0}")]
    Membership(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DispatcherResult<T> = Result<T, DispatcherError>;

impl DispatcherError {
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn callback_error<S: Into<String>>(msg: S) -> Self {
        Self::Callback(msg.into())
    }

    /// 是否为应当计入重试的瞬时失败。
    /// 终止性失败（未知适配器、参数非法）直接进入 FAILED，不参与退避。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatcherError::Callback(_) | DispatcherError::Timeout(_) | DispatcherError::Database(_)
        )
    }
}

impl From<serde_json::Error> for DispatcherError {
    fn from(err: serde_json::Error) -> Self {
        DispatcherError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DispatcherError {
    fn from(err: anyhow::Error) -> Self {
        DispatcherError::Internal(err.to_string())
    }
}

//! 注册请求的外部契约。
//!
//! RPC/REST 外壳不在本仓库内，这里只定义请求形状、逐字段校验和
//! 到 AddOptions 的转换。校验失败按字段逐条上报。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::Payload;
use delayq_common::constants::{
    DEFAULT_BACKOFF, DEFAULT_DELAY_TIME, DEFAULT_SCHEMA, DEFAULT_TIMEOUT,
};

/// 退避序列长度上限，防止恶意请求写入超长 JSON
const MAX_BACKOFF_LEN: usize = 64;

/// 注册请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// 首次延迟（秒）
    pub delay_time: i64,
    /// 单次尝试超时（秒）
    pub timeout: i64,
    /// 退避序列（秒）
    #[serde(default)]
    pub backoff: Vec<i64>,
    /// 回调 schema
    pub schema: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// 注册应答
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReply {
    pub task_no: i64,
}

/// 单字段校验错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl RegisterRequest {
    /// 逐字段校验。`known_schemas` 为当前已注册的适配器 schema 集合。
    pub fn validate(&self, known_schemas: &[String]) -> Result<(), Vec<FieldError>> {
        let mut errs = Vec::new();

        if self.delay_time < 0 {
            errs.push(FieldError {
                field: "delay_time",
                message: format!("不能为负数: {}", self.delay_time),
            });
        }
        if self.timeout <= 0 {
            errs.push(FieldError {
                field: "timeout",
                message: format!("必须为正数: {}", self.timeout),
            });
        }
        if self.backoff.len() > MAX_BACKOFF_LEN {
            errs.push(FieldError {
                field: "backoff",
                message: format!("长度超过上限 {MAX_BACKOFF_LEN}: {}", self.backoff.len()),
            });
        }
        for (i, b) in self.backoff.iter().enumerate() {
            if *b <= 0 {
                errs.push(FieldError {
                    field: "backoff",
                    message: format!("第 {i} 项必须为正数: {b}"),
                });
            }
        }

        let schema = self.schema.to_uppercase();
        if schema.is_empty() {
            errs.push(FieldError {
                field: "schema",
                message: "不能为空".to_string(),
            });
        } else if !known_schemas.iter().any(|s| s.eq_ignore_ascii_case(&schema)) {
            errs.push(FieldError {
                field: "schema",
                message: format!("未注册的 schema: {}", self.schema),
            });
        }

        // FMT 为本地合成适配器，其余 schema 必须有目标地址
        if !schema.is_empty() && schema != "FMT" && self.url.is_empty() {
            errs.push(FieldError {
                field: "url",
                message: format!("schema {} 需要目标地址", self.schema),
            });
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs)
        }
    }

    pub fn into_options(self) -> AddOptions {
        AddOptions::default()
            .delay_time(self.delay_time)
            .timeout(self.timeout)
            .backoff(self.backoff)
            .payload(Payload {
                schema: self.schema,
                url: self.url,
                path: self.path,
                data: self.data,
            })
    }
}

/// 任务创建选项，未设置的字段采用默认值
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub delay_time: i64,
    pub timeout: i64,
    pub backoff: Vec<i64>,
    pub cron: String,
    pub payload: Payload,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            delay_time: DEFAULT_DELAY_TIME,
            timeout: DEFAULT_TIMEOUT,
            backoff: DEFAULT_BACKOFF.to_vec(),
            cron: String::new(),
            payload: Payload {
                schema: DEFAULT_SCHEMA.to_string(),
                ..Default::default()
            },
        }
    }
}

impl AddOptions {
    pub fn delay_time(mut self, d: i64) -> Self {
        self.delay_time = d;
        self
    }

    pub fn timeout(mut self, t: i64) -> Self {
        self.timeout = t;
        self
    }

    pub fn backoff(mut self, b: Vec<i64>) -> Self {
        self.backoff = b;
        self
    }

    pub fn cron<S: Into<String>>(mut self, expr: S) -> Self {
        self.cron = expr.into();
        self
    }

    pub fn payload(mut self, p: Payload) -> Self {
        self.payload = p;
        self
    }
}

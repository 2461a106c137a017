//! 回调适配器。
//!
//! 适配器按大写 schema 注册进一张表，启动前开放注册，启动后只读。
//! 每个适配器执行一次回调尝试并返回字符串响应；约定响应恰为
//! `SUCCESS` 才算业务成功。

mod fmt;
mod grpc;
mod http;

pub use fmt::FmtCallback;
pub use grpc::GrpcCallback;
pub use http::HttpCallback;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use delayq_domain::Payload;
use delayq_errors::DispatcherResult;

/// 一种回调传输。
#[async_trait]
pub trait Callback: Send + Sync {
    /// 执行一次回调尝试。timeout 是本次尝试的剩余时间预算，
    /// 实现必须遵守，不得无限阻塞。
    async fn request(&self, payload: &Payload, timeout: Duration) -> DispatcherResult<String>;

    /// 停机时释放长连接等资源
    async fn close(&self) -> DispatcherResult<()>;
}

/// schema 到适配器的注册表
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Callback>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置四种适配器
    pub fn defaults() -> DispatcherResult<Self> {
        let mut registry = Self::new();
        let http = Arc::new(HttpCallback::new()?);
        registry.register("HTTP", http.clone());
        registry.register("HTTPS", http);
        registry.register("GRPC", Arc::new(GrpcCallback::new()));
        registry.register("FMT", Arc::new(FmtCallback::new()));
        Ok(registry)
    }

    /// 注册一个适配器，schema 统一转大写。同名覆盖。
    pub fn register<S: AsRef<str>>(&mut self, schema: S, adapter: Arc<dyn Callback>) {
        self.adapters
            .insert(schema.as_ref().to_uppercase(), adapter);
    }

    pub fn get(&self, schema: &str) -> Option<Arc<dyn Callback>> {
        self.adapters.get(&schema.to_uppercase()).cloned()
    }

    /// 已注册的 schema 列表
    pub fn schemas(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub async fn close_all(&self) -> DispatcherResult<()> {
        for adapter in self.adapters.values() {
            adapter.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_is_case_insensitive() {
        let registry = AdapterRegistry::defaults().unwrap();
        assert!(registry.get("fmt").is_some());
        assert!(registry.get("FMT").is_some());
        assert!(registry.get("Http").is_some());
        assert!(registry.get("CARRIER-PIGEON").is_none());
    }

    #[tokio::test]
    async fn test_open_registration() {
        struct Echo;
        #[async_trait]
        impl Callback for Echo {
            async fn request(
                &self,
                _payload: &Payload,
                _timeout: Duration,
            ) -> DispatcherResult<String> {
                Ok("SUCCESS".to_string())
            }
            async fn close(&self) -> DispatcherResult<()> {
                Ok(())
            }
        }

        let mut registry = AdapterRegistry::new();
        registry.register("echo", Arc::new(Echo));
        let adapter = registry.get("ECHO").unwrap();
        let resp = adapter
            .request(&Payload::default(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp, "SUCCESS");
        registry.close_all().await.unwrap();
    }
}

//! 合成适配器，测试与联调用。直接把 data.result 当作响应返回。

use std::time::Duration;

use async_trait::async_trait;

use super::Callback;
use delayq_domain::Payload;
use delayq_errors::DispatcherResult;

#[derive(Debug, Default)]
pub struct FmtCallback;

impl FmtCallback {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Callback for FmtCallback {
    async fn request(&self, payload: &Payload, _timeout: Duration) -> DispatcherResult<String> {
        if let Some(ret) = payload.data.get("result") {
            if let Some(s) = ret.as_str() {
                return Ok(s.to_string());
            }
        }
        Ok("FAIL".to_string())
    }

    async fn close(&self) -> DispatcherResult<()> {
        Ok(())
    }
}

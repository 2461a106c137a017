//! HTTP/HTTPS 回调。POST JSON 到 url+path，响应体即回调响应。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use super::Callback;
use delayq_domain::Payload;
use delayq_errors::{DispatcherError, DispatcherResult};

pub struct HttpCallback {
    client: reqwest::Client,
}

impl HttpCallback {
    pub fn new() -> DispatcherResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            // 回调端点常用自签证书
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| DispatcherError::Callback(format!("构建 HTTP 客户端失败: {e}")))?;
        Ok(Self { client })
    }

    fn target_url(payload: &Payload) -> String {
        let url = format!("{}{}", payload.url, payload.path);
        if url.starts_with("http") {
            url
        } else {
            format!("{}://{}", payload.schema.to_lowercase(), url)
        }
    }
}

#[async_trait]
impl Callback for HttpCallback {
    async fn request(&self, payload: &Payload, timeout: Duration) -> DispatcherResult<String> {
        let start = Instant::now();
        let url = Self::target_url(payload);
        info!(url = %url, schema = %payload.schema, "HTTP 回调请求");

        let resp = self
            .client
            .post(&url)
            .json(&payload.data)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| DispatcherError::Callback(format!("HTTP 请求失败: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| DispatcherError::Callback(format!("读取响应体失败: {e}")))?;

        info!(
            url = %url,
            status = status.as_u16(),
            body = %body,
            cost_ms = start.elapsed().as_millis() as u64,
            "HTTP 回调响应"
        );
        Ok(body)
    }

    async fn close(&self) -> DispatcherResult<()> {
        // reqwest 的连接池随客户端释放
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_adds_scheme_when_missing() {
        let payload = Payload {
            schema: "HTTP".to_string(),
            url: "127.0.0.1:8081".to_string(),
            path: "/example/valid".to_string(),
            ..Default::default()
        };
        assert_eq!(
            HttpCallback::target_url(&payload),
            "http://127.0.0.1:8081/example/valid"
        );

        let payload = Payload {
            schema: "HTTPS".to_string(),
            url: "10.0.0.1".to_string(),
            path: "/cb".to_string(),
            ..Default::default()
        };
        assert_eq!(HttpCallback::target_url(&payload), "https://10.0.0.1/cb");
    }

    #[test]
    fn test_target_url_keeps_full_url() {
        let payload = Payload {
            schema: "HTTP".to_string(),
            url: "https://example.com".to_string(),
            path: "/cb".to_string(),
            ..Default::default()
        };
        assert_eq!(
            HttpCallback::target_url(&payload),
            "https://example.com/cb"
        );
    }
}

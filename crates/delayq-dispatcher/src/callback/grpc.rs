//! gRPC 回调。
//!
//! 对 payload.path 指定的方法做一次泛化 unary 调用：请求体是
//! data 转成的 Struct，应答取 Value 的字符串值。按目标地址缓存
//! 惰性连接的 Channel。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use prost_types::value::Kind;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use super::Callback;
use delayq_domain::Payload;
use delayq_errors::{DispatcherError, DispatcherResult};

pub struct GrpcCallback {
    clients: Mutex<HashMap<String, Channel>>,
}

impl GrpcCallback {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn channel(&self, url: &str) -> DispatcherResult<Channel> {
        let mut clients = self.clients.lock().await;
        if let Some(channel) = clients.get(url) {
            return Ok(channel.clone());
        }
        let endpoint_url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("http://{url}")
        };
        let endpoint = Endpoint::from_shared(endpoint_url)
            .map_err(|e| DispatcherError::Callback(format!("非法的 gRPC 地址 {url}: {e}")))?;
        let channel = endpoint.connect_lazy();
        clients.insert(url.to_string(), channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl Callback for GrpcCallback {
    async fn request(&self, payload: &Payload, timeout: Duration) -> DispatcherResult<String> {
        let channel = self.channel(&payload.url).await?;

        let args = map_to_struct(&payload.data);
        let method = if payload.path.starts_with('/') {
            payload.path.clone()
        } else {
            format!("/{}", payload.path)
        };
        let path = PathAndQuery::try_from(method.as_str())
            .map_err(|e| DispatcherError::Callback(format!("非法的 gRPC 方法 {method}: {e}")))?;

        info!(url = %payload.url, method = %method, "gRPC 回调请求");

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| DispatcherError::Callback(format!("gRPC 连接未就绪: {e}")))?;
        let codec =
            tonic::codec::ProstCodec::<prost_types::Struct, prost_types::Value>::default();
        let call = grpc.unary(tonic::Request::new(args), path, codec);
        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| DispatcherError::Timeout(format!("gRPC 调用超时: {method}")))?
            .map_err(|status| DispatcherError::Callback(format!("gRPC 调用失败: {status}")))?;

        let value = response.into_inner();
        Ok(match value.kind {
            Some(Kind::StringValue(s)) => s,
            _ => String::new(),
        })
    }

    async fn close(&self) -> DispatcherResult<()> {
        // Channel 随引用释放，这里只清空缓存
        self.clients.lock().await.clear();
        Ok(())
    }
}

fn map_to_struct(data: &serde_json::Map<String, serde_json::Value>) -> prost_types::Struct {
    prost_types::Struct {
        fields: data
            .iter()
            .map(|(k, v)| (k.clone(), json_to_prost(v)))
            .collect(),
    }
}

fn json_to_prost(v: &serde_json::Value) -> prost_types::Value {
    let kind = match v {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(json_to_prost).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(map_to_struct(map)),
    };
    prost_types::Value { kind: Some(kind) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_to_struct_covers_scalar_kinds() {
        let mut data = serde_json::Map::new();
        data.insert("s".to_string(), json!("hello"));
        data.insert("n".to_string(), json!(1.5));
        data.insert("b".to_string(), json!(true));
        data.insert("nil".to_string(), json!(null));
        data.insert("list".to_string(), json!([1, "two"]));
        data.insert("nested".to_string(), json!({"k": "v"}));

        let st = map_to_struct(&data);
        assert!(matches!(
            st.fields["s"].kind,
            Some(Kind::StringValue(ref s)) if s == "hello"
        ));
        assert!(matches!(st.fields["n"].kind, Some(Kind::NumberValue(n)) if n == 1.5));
        assert!(matches!(st.fields["b"].kind, Some(Kind::BoolValue(true))));
        assert!(matches!(st.fields["nil"].kind, Some(Kind::NullValue(_))));
        match &st.fields["list"].kind {
            Some(Kind::ListValue(list)) => assert_eq!(list.values.len(), 2),
            other => panic!("期望 ListValue，得到 {other:?}"),
        }
        match &st.fields["nested"].kind {
            Some(Kind::StructValue(nested)) => {
                assert!(matches!(
                    nested.fields["k"].kind,
                    Some(Kind::StringValue(ref s)) if s == "v"
                ));
            }
            other => panic!("期望 StructValue，得到 {other:?}"),
        }
    }
}

//! 成员信息来源的抽象。
//!
//! 真实实现走 Kubernetes API，按 StatefulSet 的标签选择器列出并
//! watch 同组 Pod；测试注入脚本化实现。

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use tracing::warn;

use crate::pod::parse_ordinal;
use delayq_errors::{DispatcherError, DispatcherResult};

/// 成员变更事件，载荷为 Pod 序号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    Added(i64),
    Modified(i64),
    Deleted(i64),
    Error(String),
}

pub type PodEventStream = Pin<Box<dyn Stream<Item = PodEvent> + Send>>;

#[async_trait]
pub trait MembershipBackend: Send + Sync + 'static {
    /// 全量列出当前存活 Pod 的序号
    async fn list_ordinals(&self) -> DispatcherResult<Vec<i64>>;

    /// 建立事件流。流结束后由调用方决定是否重建。
    async fn watch(&self) -> DispatcherResult<PodEventStream>;
}

/// 真实 Kubernetes 实现
pub struct KubeBackend {
    client: kube::Client,
    namespace: String,
    sts_name: String,
}

impl KubeBackend {
    pub fn new(client: kube::Client, namespace: String, sts_name: String) -> Self {
        Self {
            client,
            namespace,
            sts_name,
        }
    }

    /// 用集群内配置建立客户端
    pub async fn try_default(namespace: String, sts_name: String) -> DispatcherResult<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| DispatcherError::Membership(format!("创建 Kubernetes 客户端失败: {e}")))?;
        Ok(Self::new(client, namespace, sts_name))
    }

    /// 取 StatefulSet 的标签选择器，拼成 `k=v,k=v` 形式
    async fn label_selector(&self) -> DispatcherResult<String> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
        let sts = api.get(&self.sts_name).await.map_err(|e| {
            DispatcherError::Membership(format!("获取 StatefulSet {} 失败: {e}", self.sts_name))
        })?;
        let labels = sts
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .ok_or_else(|| {
                DispatcherError::Membership(format!(
                    "StatefulSet {} 缺少标签选择器",
                    self.sts_name
                ))
            })?;
        Ok(labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","))
    }
}

fn pod_ordinal(pod: &Pod) -> Option<i64> {
    pod.metadata.name.as_deref().and_then(parse_ordinal)
}

#[async_trait]
impl MembershipBackend for KubeBackend {
    async fn list_ordinals(&self) -> DispatcherResult<Vec<i64>> {
        let selector = self.label_selector().await?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pods = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| DispatcherError::Membership(format!("列出 Pod 失败: {e}")))?;
        let mut ordinals: Vec<i64> = pods.items.iter().filter_map(pod_ordinal).collect();
        ordinals.sort_unstable();
        ordinals.dedup();
        Ok(ordinals)
    }

    async fn watch(&self) -> DispatcherResult<PodEventStream> {
        let selector = self.label_selector().await?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        // watch 流借用 Api，由持有两者的后台任务驱动，事件经
        // 通道转发；任务退出即流结束，由消费方决定是否重建
        let (tx, rx) = tokio::sync::mpsc::channel::<PodEvent>(16);
        tokio::spawn(async move {
            let stream = match api
                .watch(&WatchParams::default().labels(&selector), "0")
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(PodEvent::Error(format!("建立 Pod watch 失败: {e}"))).await;
                    return;
                }
            };
            futures::pin_mut!(stream);
            while let Some(ev) = stream.next().await {
                let mapped = match ev {
                    Ok(WatchEvent::Added(pod)) => pod_ordinal(&pod).map(PodEvent::Added),
                    Ok(WatchEvent::Modified(pod)) => pod_ordinal(&pod).map(PodEvent::Modified),
                    Ok(WatchEvent::Deleted(pod)) => pod_ordinal(&pod).map(PodEvent::Deleted),
                    Ok(WatchEvent::Bookmark(_)) => None,
                    Ok(WatchEvent::Error(e)) => Some(PodEvent::Error(e.message)),
                    Err(e) => {
                        warn!(error = %e, "Pod watch 流返回错误");
                        Some(PodEvent::Error(e.to_string()))
                    }
                };
                if let Some(event) = mapped {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|ev| (ev, rx))
        })))
    }
}

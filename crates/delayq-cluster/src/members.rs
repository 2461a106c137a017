//! 存活序号集合。
//!
//! 读多写少，读写锁保护。watch 事件做增量更新，周期性全量拉取
//! 直接替换集合，弥补 watch 断流造成的缺口。

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use crate::backend::{MembershipBackend, PodEvent};

/// watch 断流后的重建间隔
const REWATCH_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct StatefulSetMembers {
    ordinals: RwLock<BTreeSet<i64>>,
}

impl StatefulSetMembers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 应用一个 watch 事件，返回集合是否发生变化。
    /// Modified 不改变成员关系，Error 只记录日志。
    pub fn apply(&self, event: &PodEvent) -> bool {
        match event {
            PodEvent::Added(n) => self.ordinals.write().unwrap().insert(*n),
            PodEvent::Deleted(n) => self.ordinals.write().unwrap().remove(n),
            PodEvent::Modified(_) => false,
            PodEvent::Error(msg) => {
                warn!(error = %msg, "成员 watch 事件流报告错误");
                false
            }
        }
    }

    /// 全量替换，返回集合是否发生变化
    pub fn replace(&self, ordinals: Vec<i64>) -> bool {
        let new: BTreeSet<i64> = ordinals.into_iter().collect();
        let mut guard = self.ordinals.write().unwrap();
        if *guard == new {
            return false;
        }
        *guard = new;
        true
    }

    /// 升序快照
    pub fn snapshot(&self) -> Vec<i64> {
        self.ordinals.read().unwrap().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ordinals.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.read().unwrap().is_empty()
    }
}

/// 消费 watch 事件流并在成员变化时回调。流断开后退避重建。
pub async fn watch_members(
    backend: Arc<dyn MembershipBackend>,
    members: Arc<StatefulSetMembers>,
    on_change: Arc<dyn Fn(Vec<i64>) + Send + Sync>,
) {
    loop {
        let mut stream = match backend.watch().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "建立成员 watch 失败，稍后重试");
                tokio::time::sleep(REWATCH_BACKOFF).await;
                continue;
            }
        };
        while let Some(event) = stream.next().await {
            if members.apply(&event) {
                let snapshot = members.snapshot();
                info!(ordinals = ?snapshot, event = ?event, "集群成员发生变化");
                on_change(snapshot);
            }
        }
        warn!("成员 watch 流结束，稍后重建");
        tokio::time::sleep(REWATCH_BACKOFF).await;
    }
}

/// 全量拉取一次并在成员变化时回调
pub async fn pull_members(
    backend: &Arc<dyn MembershipBackend>,
    members: &Arc<StatefulSetMembers>,
    on_change: &Arc<dyn Fn(Vec<i64>) + Send + Sync>,
) -> delayq_errors::DispatcherResult<()> {
    let ordinals = backend.list_ordinals().await?;
    if members.replace(ordinals) {
        let snapshot = members.snapshot();
        info!(ordinals = ?snapshot, "全量拉取后集群成员发生变化");
        on_change(snapshot);
    }
    Ok(())
}

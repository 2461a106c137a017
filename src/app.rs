//! 进程装配。
//!
//! 把配置、数据库连接池、任务存储、调度器和集群成员发现接到
//! 一起。Pod 内自动用 Pod 名尾号覆盖节点序号，并启动 watch 与
//! 周期性全量拉取两条成员更新链路。

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::info;

use delayq_cluster::{
    current_pod_ordinal, is_in_pod, pull_members, watch_members, KubeBackend, MembershipBackend,
    StatefulSetMembers,
};
use delayq_config::AppConfig;
use delayq_dispatcher::{AdapterRegistry, Dispatcher};
use delayq_errors::{DispatcherError, DispatcherResult};
use delayq_infrastructure::{connect, PostgresTaskStore};

pub struct App {
    cfg: AppConfig,
    dispatcher: Arc<Dispatcher>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// 建立连接池、准备表结构并装配调度器
    pub async fn build(mut cfg: AppConfig) -> DispatcherResult<Self> {
        if is_in_pod() {
            cfg.dispatcher.node = current_pod_ordinal()?;
            info!(node = cfg.dispatcher.node, "从 Pod 名解析节点序号");
        }
        let pool = connect(&cfg.database).await?;
        let store = PostgresTaskStore::new(pool);
        store.ensure_schema().await?;
        let dispatcher = Dispatcher::new(
            cfg.dispatcher.clone(),
            Arc::new(store),
            AdapterRegistry::defaults()?,
        )?;
        Ok(Self {
            cfg,
            dispatcher,
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// 启动调度器；Pod 内同时接上集群成员发现
    pub async fn start(&self) -> DispatcherResult<()> {
        self.dispatcher.start()?;
        if is_in_pod() {
            self.start_membership().await?;
        }
        Ok(())
    }

    async fn start_membership(&self) -> DispatcherResult<()> {
        let cfg = &self.cfg.dispatcher;
        if cfg.name_space.is_empty() || cfg.sts_name.is_empty() {
            return Err(DispatcherError::Configuration(
                "Pod 内运行需要配置 name_space 与 sts_name".to_string(),
            ));
        }
        let backend: Arc<dyn MembershipBackend> = Arc::new(
            KubeBackend::try_default(cfg.name_space.clone(), cfg.sts_name.clone()).await?,
        );
        let members = StatefulSetMembers::new();
        let dispatcher = self.dispatcher.clone();
        let on_change: Arc<dyn Fn(Vec<i64>) + Send + Sync> =
            Arc::new(move |ordinals| dispatcher.set_nodes(&ordinals));

        // 被动监听
        let watch_handle = tokio::spawn(watch_members(
            backend.clone(),
            members.clone(),
            on_change.clone(),
        ));
        self.background.lock().unwrap().push(watch_handle);

        // 主动拉取兜底
        self.dispatcher
            .schedule_every(cfg.node_interval(), move |_trace_id| {
                let backend = backend.clone();
                let members = members.clone();
                let on_change = on_change.clone();
                async move {
                    if let Err(e) = pull_members(&backend, &members, &on_change).await {
                        tracing::error!(error = %e, "全量拉取集群成员失败");
                    }
                }
            })?;
        Ok(())
    }

    pub async fn stop(&self) -> DispatcherResult<()> {
        for handle in self.background.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.dispatcher.stop().await
    }
}

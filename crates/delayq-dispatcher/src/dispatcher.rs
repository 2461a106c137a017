//! 调度核心。
//!
//! 注册路径：延迟不超过快路径阈值的任务，入库即 RUNNING 并直接
//! 入轮；其余任务以 PENDING 落库，由周期性扫表在临近到期时认领。
//! 触发路径：回调结果驱动重试状态机，按退避序列改写 next_run_at，
//! 短延迟重试直接重新入轮，长延迟重试写回 PENDING 等下轮扫表。
//!
//! 定时任务的触发不回写持久化行：行保持注册时的状态，重启后
//! 定时链不自动恢复。

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::callback::AdapterRegistry;
use crate::cron::cron_to_duration;
use delayq_cluster::resolve_range;
use delayq_common::constants::{CALLBACK_SUCCESS, ERROR_CHANNEL_CAPACITY, PAYLOAD_ORIGINAL_KEY};
use delayq_common::{trace, OwnershipRange, SnowflakeNode};
use delayq_config::DispatcherConfig;
use delayq_domain::{AddOptions, FailMsg, Task, TaskStatus, TaskStore};
use delayq_errors::{DispatcherError, DispatcherResult};
use delayq_timingwheel::{
    task_fn, EveryScheduler, Timer, TimerFuture, TimerTask, TimingWheel, WheelOptions,
};

pub struct Dispatcher {
    cfg: DispatcherConfig,
    store: Arc<dyn TaskStore>,
    wheel: Arc<TimingWheel>,
    sn: SnowflakeNode,
    adapters: AdapterRegistry,
    range: RwLock<OwnershipRange>,
    err_tx: mpsc::Sender<DispatcherError>,
    err_rx: Mutex<Option<mpsc::Receiver<DispatcherError>>>,
    self_weak: Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn new(
        cfg: DispatcherConfig,
        store: Arc<dyn TaskStore>,
        adapters: AdapterRegistry,
    ) -> DispatcherResult<Arc<Self>> {
        let wheel = TimingWheel::new(
            cfg.tick(),
            cfg.wheel_size,
            WheelOptions::default()
                .with_pool_size(cfg.pool_size)
                .with_pool_backlog(cfg.pool_size),
        )?;
        let sn = SnowflakeNode::new(cfg.node)?;
        let (err_tx, err_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let range = resolve_range(cfg.node, &[cfg.node]);
        Ok(Arc::new_cyclic(|weak| Self {
            cfg,
            store,
            wheel,
            sn,
            adapters,
            range: RwLock::new(range),
            err_tx,
            err_rx: Mutex::new(Some(err_rx)),
            self_weak: weak.clone(),
        }))
    }

    pub fn node(&self) -> i64 {
        self.cfg.node
    }

    /// 已注册的回调 schema 列表，供注册请求校验
    pub fn schemas(&self) -> Vec<String> {
        self.adapters.schemas()
    }

    pub fn range(&self) -> OwnershipRange {
        *self.range.read().unwrap()
    }

    /// 用存活节点序号重算本节点的归属区间。
    /// 空列表退化为单节点集合。
    pub fn set_nodes(&self, ns: &[i64]) {
        info!(nodes = ?ns, node = self.cfg.node, "更新存活节点");
        let new = resolve_range(self.cfg.node, ns);
        *self.range.write().unwrap() = new;
        info!(lo = new.lo, hi = new.hi, "节点归属区间已更新");
    }

    /// 启动两个扫表定时器与时间轮
    pub fn start(&self) -> DispatcherResult<()> {
        // 待处理扫表：认领临近到期的 PENDING 行
        let weak = self.self_weak.clone();
        self.schedule_every(self.cfg.pending_interval(), move |trace_id| {
            let weak = weak.clone();
            async move {
                let Some(dispatcher) = weak.upgrade() else { return };
                debug!(trace_id = %trace_id, "待处理扫表开始");
                if let Err(e) = dispatcher.sweep_pending(&trace_id).await {
                    dispatcher
                        .collect(DispatcherError::Internal(format!("fetch pending tasks: {e}")));
                }
                debug!(trace_id = %trace_id, "待处理扫表结束");
            }
        })?;

        // 超时回收扫表：把卡死在 RUNNING 的行重新送入重试状态机，
        // 否则进程崩溃时执行到一半的任务永远无法恢复
        let weak = self.self_weak.clone();
        self.schedule_every(self.cfg.timeout_interval(), move |trace_id| {
            let weak = weak.clone();
            async move {
                let Some(dispatcher) = weak.upgrade() else { return };
                debug!(trace_id = %trace_id, "超时回收扫表开始");
                if let Err(e) = dispatcher.sweep_timeout(&trace_id).await {
                    dispatcher
                        .collect(DispatcherError::Internal(format!("fetch timeout tasks: {e}")));
                }
                debug!(trace_id = %trace_id, "超时回收扫表结束");
            }
        })?;

        self.wheel.start()
    }

    /// 关闭适配器并停掉时间轮。幂等。
    pub async fn stop(&self) -> DispatcherResult<()> {
        self.adapters.close_all().await?;
        self.wheel.stop().await;
        Ok(())
    }

    /// 注册一条任务，返回全集群唯一的任务号
    pub async fn add(&self, trace_id: &str, opts: AddOptions) -> DispatcherResult<i64> {
        if opts.delay_time < 0 {
            return Err(DispatcherError::invalid_params(format!(
                "delay_time 不能为负数: {}",
                opts.delay_time
            )));
        }
        if opts.timeout <= 0 {
            return Err(DispatcherError::invalid_params(format!(
                "timeout 必须为正数: {}",
                opts.timeout
            )));
        }
        if !opts.cron.is_empty() {
            cron_to_duration(&opts.cron)?;
        }

        let task_no = self.sn.generate();
        let now = Utc::now();
        let next_run_at = now + chrono::Duration::seconds(opts.delay_time);
        let run_timeout_at = next_run_at + chrono::Duration::seconds(opts.timeout);
        let fast = Duration::from_secs(opts.delay_time as u64) <= self.cfg.fast_path_time();

        let mut task = Task {
            id: 0,
            task_no,
            payload: opts.payload,
            delay_time: opts.delay_time,
            timeout: opts.timeout,
            backoff: opts.backoff,
            cron_expr: opts.cron,
            status: TaskStatus::Pending,
            next_run_at,
            run_timeout_at,
            fail_count: -1,
            last_retry_at: None,
            locked_by: self.cfg.node,
            fail_msgs: Default::default(),
            extra: delayq_domain::Extra {
                trace_id: trace_id.to_string(),
            },
            created_at: now,
            updated_at: now,
        };
        info!(
            task_no,
            delay_time = task.delay_time,
            fast_path = fast,
            trace_id = %trace_id,
            "创建任务"
        );
        if fast {
            task.status = TaskStatus::Running;
            task.fail_count = 0;
        }
        self.store.insert(&task).await?;
        if fast {
            // 快路径：入库后立即入轮，不经过扫表
            self.submit(trace_id, task, None).await?;
        }
        Ok(task_no)
    }

    /// 把任务送进时间轮。from 给出期望的持久化前置状态；None 表示
    /// 入库时已写好 RUNNING，无需再做持久化迁移。
    pub(crate) async fn submit(
        &self,
        trace_id: &str,
        task: Task,
        from: Option<TaskStatus>,
    ) -> DispatcherResult<()> {
        // 第 k 次尝试进行中 fail_count 为 k-1，超过退避序列长度
        // 说明重试机会已经用完
        if task.fail_count >= 0 && (task.fail_count as usize) > task.backoff.len() {
            return self.failure(trace_id, task).await;
        }
        self.mark_running_and_arm(trace_id, task, from).await
    }

    // 显式装箱返回类型：该函数经由定时闭包间接调用自身
    // （cron 链触发 -> execute -> failure -> 本函数），若保留
    // `async fn` 的匿名 opaque 类型，编译器在证明该 opaque 类型
    // 是否 Send 时会形成自引用循环而报错。显式 `Pin<Box<dyn Future>>`
    // 在构造处就声明并核验 Send，不参与该循环，语义与 `async fn` 完全一致。
    fn mark_running_and_arm<'a>(
        &'a self,
        trace_id: &'a str,
        task: Task,
        from: Option<TaskStatus>,
    ) -> Pin<Box<dyn Future<Output = DispatcherResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let now = Utc::now();
            if let Some(from) = from {
                self.store.mark_running(&task, from).await?;
            }
            let delay = (task.next_run_at - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                task_no = task.task_no,
                attempt = task.fail_count,
                delay_ms = delay.as_millis() as u64,
                trace_id = %trace_id,
                "任务入轮"
            );
            if task.delay_time != 0 {
                let closure = self.execute_closure(trace_id.to_string(), task.clone());
                self.wheel.after_func(delay, closure)?;
            }
            // 重试重新入轮时不再重复编排定时链
            if !task.cron_expr.is_empty() && from != Some(TaskStatus::Running) {
                let interval = cron_to_duration(&task.cron_expr)?;
                // 定时链每次触发都在父 trace 后追加新的子 id
                let weak = self.self_weak.clone();
                let parent = trace_id.to_string();
                let template = task.clone();
                let closure = task_fn(move || {
                    let weak = weak.clone();
                    let fire_trace = trace::append(&parent, &trace::generate_trace_id());
                    let task = template.clone();
                    async move {
                        let Some(dispatcher) = weak.upgrade() else { return };
                        let task_no = task.task_no;
                        if let Err(e) = dispatcher.execute(&fire_trace, task).await {
                            dispatcher.collect(DispatcherError::Internal(format!(
                                "execute schedule task {task_no}: {e}"
                            )));
                        }
                    }
                });
                self.wheel
                    .schedule_func(Arc::new(EveryScheduler { interval }), closure)?;
            }
            Ok(())
        })
    }

    /// 执行一次回调尝试并驱动状态机
    pub(crate) async fn execute(
        &self,
        trace_id: &str,
        mut task: Task,
    ) -> DispatcherResult<()> {
        let attempt = task.fail_count;
        info!(
            task_no = task.task_no,
            attempt,
            delay_time = task.current_delay(),
            trace_id = %trace_id,
            "开始执行回调"
        );

        let Some(adapter) = self.adapters.get(&task.payload.schema) else {
            // 未知 schema 属终止性失败，不参与退避重试
            error!(
                task_no = task.task_no,
                schema = %task.payload.schema,
                trace_id = %trace_id,
                "未注册的回调适配器，任务终止"
            );
            task.push_fail_msg(FailMsg {
                resp: String::new(),
                err: format!("adapter not found for schema {}", task.payload.schema),
            });
            return self.store.mark_failed(&task).await;
        };

        // 注入关联信息，下游据此对账
        task.payload.data.insert(
            PAYLOAD_ORIGINAL_KEY.to_string(),
            serde_json::json!({ "msg_no": task.task_no, "trace_id": trace_id }),
        );

        // 本次尝试的剩余时间预算，由 run_timeout_at 推出
        let budget = (task.run_timeout_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let outcome = tokio::time::timeout(budget, adapter.request(&task.payload, budget)).await;

        match outcome {
            Ok(Ok(resp)) if resp == CALLBACK_SUCCESS => {
                info!(
                    task_no = task.task_no,
                    attempt,
                    trace_id = %trace_id,
                    "回调成功"
                );
                self.store.mark_succeeded(&task).await
            }
            Ok(Ok(resp)) => {
                task.push_fail_msg(FailMsg {
                    resp,
                    err: String::new(),
                });
                self.failure(trace_id, task).await
            }
            Ok(Err(e)) => {
                task.push_fail_msg(FailMsg {
                    resp: String::new(),
                    err: e.to_string(),
                });
                self.failure(trace_id, task).await
            }
            Err(_) => {
                task.push_fail_msg(FailMsg {
                    resp: String::new(),
                    err: format!("task timeout, timeout:{}s", task.timeout),
                });
                self.failure(trace_id, task).await
            }
        }
    }

    /// 失败迁移：还有退避项就编排重试，否则终态 FAILED
    pub(crate) async fn failure(
        &self,
        trace_id: &str,
        mut task: Task,
    ) -> DispatcherResult<()> {
        error!(
            task_no = task.task_no,
            attempt = task.fail_count,
            trace_id = %trace_id,
            last_fail = ?task.fail_msgs.0.last(),
            "回调失败"
        );
        let now = Utc::now();
        if task.fail_count >= 0 && (task.fail_count as usize) < task.backoff.len() {
            task.delay_time = task.backoff[task.fail_count as usize];
            task.next_run_at = now + chrono::Duration::seconds(task.delay_time);
            task.run_timeout_at = task.next_run_at + chrono::Duration::seconds(task.timeout);
            task.last_retry_at = Some(now);
            if Duration::from_secs(task.delay_time as u64) <= self.cfg.fast_path_time() {
                // 快路径重试：跳过写回 PENDING，直接重新入轮，
                // 重试唤醒追加新的子 trace_id
                task.fail_count += 1;
                let retry_trace = trace::append(trace_id, &trace::generate_trace_id());
                return self
                    .mark_running_and_arm(&retry_trace, task, Some(TaskStatus::Running))
                    .await;
            }
            return self.store.mark_retry_pending(&task).await;
        }
        // 重试耗尽
        self.store.mark_failed(&task).await
    }

    /// 认领临近到期的 PENDING 行并入轮
    async fn sweep_pending(&self, trace_id: &str) -> DispatcherResult<()> {
        let range = self.range();
        let tasks = self
            .store
            .fetch_pending(self.cfg.pending_limit, self.cfg.advance_pending_time(), range)
            .await?;
        if !tasks.is_empty() {
            debug!(count = tasks.len(), trace_id = %trace_id, "认领待处理任务");
        }
        for mut task in tasks {
            // 认领即发起一次尝试：慢路径行从 -1 走到 0
            task.fail_count += 1;
            let task_trace = trace::append(task.trace_id(), trace_id);
            let task_no = task.task_no;
            if let Err(e) = self
                .submit(&task_trace, task, Some(TaskStatus::Pending))
                .await
            {
                self.collect(DispatcherError::Internal(format!(
                    "execute task {task_no}: {e}"
                )));
            }
        }
        Ok(())
    }

    /// 回收超时未完成的 RUNNING 行
    async fn sweep_timeout(&self, trace_id: &str) -> DispatcherResult<()> {
        let range = self.range();
        let tasks = self
            .store
            .fetch_timeout(self.cfg.timeout_limit, range)
            .await?;
        for mut task in tasks {
            warn!(
                task_no = task.task_no,
                trace_id = %trace_id,
                "回收超时未完成的任务"
            );
            task.push_fail_msg(FailMsg {
                resp: String::new(),
                err: format!("task timeout, timeout:{}s", task.timeout),
            });
            let task_trace = trace::append(task.trace_id(), trace_id);
            let task_no = task.task_no;
            if let Err(e) = self.failure(&task_trace, task).await {
                self.collect(DispatcherError::Internal(format!(
                    "fail task {task_no}: {e}"
                )));
            }
        }
        Ok(())
    }

    /// 触发闭包。每次触发都从模板克隆任务，定时链的多次触发互不
    /// 污染失败记录。
    fn execute_closure(&self, trace_id: String, task: Task) -> TimerTask {
        let weak = self.self_weak.clone();
        task_fn(move || {
            let weak = weak.clone();
            let trace_id = trace_id.clone();
            let task = task.clone();
            async move {
                let Some(dispatcher) = weak.upgrade() else { return };
                let task_no = task.task_no;
                if let Err(e) = dispatcher.execute(&trace_id, task).await {
                    dispatcher.collect(DispatcherError::Internal(format!(
                        "execute task {task_no}: {e}"
                    )));
                }
            }
        })
    }

    /// 以固定间隔调度一个后台动作，每次触发带新 trace_id
    pub fn schedule_every<F, Fut>(
        &self,
        interval: Duration,
        f: F,
    ) -> DispatcherResult<Arc<Timer>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.wheel.schedule_func(
            Arc::new(EveryScheduler { interval }),
            Arc::new(move || -> TimerFuture { Box::pin(f(trace::generate_trace_id())) }),
        )
    }

    /// 后台错误进通道，写满就丢弃并记日志，绝不阻塞
    pub(crate) fn collect(&self, err: DispatcherError) {
        if let Err(e) = self.err_tx.try_send(err) {
            let dropped = match e {
                mpsc::error::TrySendError::Full(err) => err,
                mpsc::error::TrySendError::Closed(err) => err,
            };
            error!(error = %dropped, "错误通道已满，错误被丢弃");
        }
    }

    /// 拉模式：取走错误接收端，只能取一次
    pub fn take_errors(&self) -> Option<mpsc::Receiver<DispatcherError>> {
        self.err_rx.lock().unwrap().take()
    }

    /// 推模式：注册错误回调。消费在后台任务里进行，注册本身立即
    /// 返回。接收端已被取走时返回 false。
    pub fn on_error<F>(&self, cb: F) -> bool
    where
        F: Fn(DispatcherError) + Send + Sync + 'static,
    {
        let Some(mut rx) = self.take_errors() else {
            return false;
        };
        tokio::spawn(async move {
            while let Some(err) = rx.recv().await {
                cb(err);
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{AdapterRegistry, FmtCallback};
    use delayq_domain::Payload;
    use delayq_infrastructure::MemoryTaskStore;
    use serde_json::{Map, Value};

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            tick_ms: 10,
            wheel_size: 64,
            pool_size: 16,
            node: 0,
            pending_limit: 10,
            pending_interval_seconds: 1,
            advance_pending_time_seconds: 1,
            timeout_limit: 10,
            timeout_interval_seconds: 1,
            node_interval_seconds: 30,
            fast_path_time_seconds: 2,
            ..Default::default()
        }
    }

    fn fmt_payload(result: &str) -> Payload {
        let mut data = Map::new();
        data.insert("result".to_string(), Value::String(result.to_string()));
        Payload {
            schema: "FMT".to_string(),
            data,
            ..Default::default()
        }
    }

    fn fmt_registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry.register("FMT", Arc::new(FmtCallback::new()));
        registry
    }

    async fn wait_for_status(
        store: &MemoryTaskStore,
        task_no: i64,
        status: TaskStatus,
        deadline: Duration,
    ) -> Task {
        let start = std::time::Instant::now();
        loop {
            if let Some(task) = store.get(task_no) {
                if task.status == status {
                    return task;
                }
            }
            if start.elapsed() > deadline {
                panic!(
                    "等待任务 {task_no} 进入 {status:?} 超时，当前: {:?}",
                    store.get(task_no).map(|t| t.status)
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_fast_path_add_arms_running_row() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();
        dispatcher.start().unwrap();

        let task_no = dispatcher
            .add(
                "trace-fast",
                AddOptions::default()
                    .delay_time(1)
                    .backoff(vec![2, 16])
                    .payload(fmt_payload("SUCCESS")),
            )
            .await
            .unwrap();

        // 入库即 RUNNING、fail_count=0
        let row = store.get(task_no).unwrap();
        assert_eq!(row.status, TaskStatus::Running);
        assert_eq!(row.fail_count, 0);
        assert_eq!(row.extra.trace_id, "trace-fast");

        let row = wait_for_status(&store, task_no, TaskStatus::Succeeded, Duration::from_secs(5))
            .await;
        assert!(row.fail_msgs.is_empty());
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_path_add_persists_pending() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();
        dispatcher.start().unwrap();

        let task_no = dispatcher
            .add(
                "trace-slow",
                AddOptions::default()
                    .delay_time(3)
                    .backoff(vec![])
                    .payload(fmt_payload("SUCCESS")),
            )
            .await
            .unwrap();

        let row = store.get(task_no).unwrap();
        assert_eq!(row.status, TaskStatus::Pending);
        assert_eq!(row.fail_count, -1);

        // 扫表认领后走到成功，认领把 fail_count 推进到 0
        let row = wait_for_status(&store, task_no, TaskStatus::Succeeded, Duration::from_secs(8))
            .await;
        assert_eq!(row.fail_count, 0);
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_until_terminal_failure() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();
        dispatcher.start().unwrap();

        let task_no = dispatcher
            .add(
                "trace-fail",
                AddOptions::default()
                    .delay_time(1)
                    .backoff(vec![1, 1])
                    .payload(fmt_payload("FAIL")),
            )
            .await
            .unwrap();

        let row =
            wait_for_status(&store, task_no, TaskStatus::Failed, Duration::from_secs(10)).await;
        // 退避两项，总共 3 次尝试，3 条失败记录
        assert_eq!(row.fail_msgs.len(), 3);
        assert!(row.fail_msgs.0.iter().all(|m| m.resp == "FAIL"));
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_backoff_single_attempt() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();
        dispatcher.start().unwrap();

        let task_no = dispatcher
            .add(
                "trace-single",
                AddOptions::default()
                    .delay_time(1)
                    .backoff(vec![])
                    .payload(fmt_payload("FAIL")),
            )
            .await
            .unwrap();

        let row =
            wait_for_status(&store, task_no, TaskStatus::Failed, Duration::from_secs(5)).await;
        assert_eq!(row.fail_msgs.len(), 1);
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_schema_is_terminal() {
        let store = MemoryTaskStore::new();
        // 空注册表，任何 schema 都找不到适配器
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), AdapterRegistry::new())
                .unwrap();
        dispatcher.start().unwrap();

        let task_no = dispatcher
            .add(
                "trace-unknown",
                AddOptions::default()
                    .delay_time(1)
                    .backoff(vec![2, 16])
                    .payload(fmt_payload("SUCCESS")),
            )
            .await
            .unwrap();

        let row =
            wait_for_status(&store, task_no, TaskStatus::Failed, Duration::from_secs(5)).await;
        // 终止性失败不消耗退避重试
        assert_eq!(row.fail_msgs.len(), 1);
        assert!(row.fail_msgs.0[0].err.contains("adapter not found"));
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_validates_inputs() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();

        let err = dispatcher
            .add("t", AddOptions::default().delay_time(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::InvalidTaskParams(_)));

        let err = dispatcher
            .add("t", AddOptions::default().timeout(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::InvalidTaskParams(_)));

        let err = dispatcher
            .add("t", AddOptions::default().cron("* * * * * *"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::InvalidCron { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_reclaim_drives_state_machine() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();

        // 模拟进程崩溃留下的 RUNNING 行：截止时间已过、无退避
        let now = Utc::now();
        let stuck = Task {
            id: 0,
            task_no: 777,
            payload: fmt_payload("SUCCESS"),
            delay_time: 1,
            timeout: 3,
            backoff: vec![],
            cron_expr: String::new(),
            status: TaskStatus::Running,
            next_run_at: now - chrono::Duration::seconds(10),
            run_timeout_at: now - chrono::Duration::seconds(7),
            fail_count: 0,
            last_retry_at: None,
            locked_by: 0,
            fail_msgs: Default::default(),
            extra: Default::default(),
            created_at: now,
            updated_at: now,
        };
        store.put(stuck);

        dispatcher.start().unwrap();
        let row =
            wait_for_status(&store, 777, TaskStatus::Failed, Duration::from_secs(5)).await;
        assert_eq!(row.fail_msgs.len(), 1);
        assert!(row.fail_msgs.0[0].err.contains("task timeout"));
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_reclaim_retries_when_backoff_left() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();

        let now = Utc::now();
        let stuck = Task {
            id: 0,
            task_no: 778,
            payload: fmt_payload("SUCCESS"),
            delay_time: 1,
            timeout: 3,
            backoff: vec![1],
            cron_expr: String::new(),
            status: TaskStatus::Running,
            next_run_at: now - chrono::Duration::seconds(10),
            run_timeout_at: now - chrono::Duration::seconds(7),
            fail_count: 0,
            last_retry_at: None,
            locked_by: 0,
            fail_msgs: Default::default(),
            extra: Default::default(),
            created_at: now,
            updated_at: now,
        };
        store.put(stuck);

        dispatcher.start().unwrap();
        // 回收后还剩一次退避机会，重试应当成功
        let row =
            wait_for_status(&store, 778, TaskStatus::Succeeded, Duration::from_secs(8)).await;
        assert_eq!(row.fail_count, 1);
        assert_eq!(row.fail_msgs.len(), 1);
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_channel_modes_are_exclusive() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();
        // 推模式注册立即返回，接收端只能被占用一次
        assert!(dispatcher.on_error(|_err| {}));
        assert!(!dispatcher.on_error(|_err| {}));
        assert!(dispatcher.take_errors().is_none());
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_channel_pull_mode_receives() {
        let store = MemoryTaskStore::new();
        let dispatcher =
            Dispatcher::new(test_config(), Arc::new(store.clone()), fmt_registry()).unwrap();
        let mut rx = dispatcher.take_errors().unwrap();
        dispatcher.collect(DispatcherError::Internal("后台失败".to_string()));
        let err = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, DispatcherError::Internal(_)));
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_nodes_updates_range() {
        let store = MemoryTaskStore::new();
        let mut cfg = test_config();
        cfg.node = 2;
        let dispatcher = Dispatcher::new(cfg, Arc::new(store.clone()), fmt_registry()).unwrap();
        assert_eq!(dispatcher.range(), OwnershipRange::new(-1, i64::MAX));

        dispatcher.set_nodes(&[0, 1, 2]);
        assert_eq!(dispatcher.range(), OwnershipRange::new(1, i64::MAX));

        // 节点 1 下线，locked_by=1 的行并入本节点区间
        dispatcher.set_nodes(&[0, 2]);
        assert_eq!(dispatcher.range(), OwnershipRange::new(0, i64::MAX));

        // 空列表退化为单节点
        dispatcher.set_nodes(&[]);
        assert_eq!(dispatcher.range(), OwnershipRange::new(-1, i64::MAX));
    }
}

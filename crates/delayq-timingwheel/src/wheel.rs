//! 分层时间轮主体。

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::error;

use crate::bucket::Bucket;
use crate::delay_queue::DelayQueue;
use crate::pool::WorkerPool;
use crate::scheduler::Scheduler;
use crate::timer::{Timer, TimerFuture, TimerTask};
use delayq_common::time::{ms_to_utc, now_ms, to_ms, truncate};
use delayq_errors::{DispatcherError, DispatcherResult};

/// 时间轮的一层。上层轮的 tick 等于本层的覆盖区间。
struct Level {
    tick_ms: i64,
    wheel_size: i64,
    interval_ms: i64,
    current_time: AtomicI64,
    buckets: Vec<Arc<Bucket>>,
    queue: Arc<DelayQueue>,
    /// 上层轮指针。懒创建，一次性写入，读端无锁。
    overflow: OnceLock<Arc<Level>>,
}

impl Level {
    fn new(tick_ms: i64, wheel_size: i64, start_ms: i64, queue: Arc<DelayQueue>) -> Arc<Self> {
        let buckets = (0..wheel_size).map(|_| Bucket::new()).collect();
        Arc::new(Self {
            tick_ms,
            wheel_size,
            interval_ms: tick_ms * wheel_size,
            current_time: AtomicI64::new(truncate(start_ms, tick_ms)),
            buckets,
            queue,
            overflow: OnceLock::new(),
        })
    }

    /// 尝试插入。已过期返回 false，由调用方立即执行。
    fn add(&self, t: &Arc<Timer>) -> bool {
        let current = self.current_time.load(Ordering::SeqCst);
        let expiration = t.expiration();
        if expiration < current + self.tick_ms {
            // 已过期
            false
        } else if expiration < current + self.interval_ms {
            // 落入本层的槽
            let virtual_id = expiration / self.tick_ms;
            let bucket = &self.buckets[(virtual_id % self.wheel_size) as usize];
            bucket.add(t);
            // 到期时间发生变化说明本轮周期首次使用该槽，需要入队。
            // 同周期后续插入写入相同值，不会重复入队。
            if bucket.set_expiration(virtual_id * self.tick_ms) {
                self.queue.offer(bucket.clone(), virtual_id * self.tick_ms);
            }
            true
        } else {
            // 超出本层覆盖区间，递归进上层轮
            let overflow = self.overflow.get_or_init(|| {
                Level::new(self.interval_ms, self.wheel_size, current, self.queue.clone())
            });
            overflow.add(t)
        }
    }

    /// 推进当前时间，并递归推进上层轮
    fn advance_clock(&self, expiration: i64) {
        let current = self.current_time.load(Ordering::SeqCst);
        if expiration >= current + self.tick_ms {
            let new = truncate(expiration, self.tick_ms);
            self.current_time.store(new, Ordering::SeqCst);
            if let Some(overflow) = self.overflow.get() {
                overflow.advance_clock(new);
            }
        }
    }
}

/// 时间轮选项
#[derive(Debug, Clone)]
pub struct WheelOptions {
    /// 工作池并发数
    pub pool_size: usize,
    /// 工作池等待队列容量
    pub pool_backlog: usize,
}

impl Default for WheelOptions {
    fn default() -> Self {
        Self {
            pool_size: 1000,
            pool_backlog: 1000,
        }
    }
}

impl WheelOptions {
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_pool_backlog(mut self, backlog: usize) -> Self {
        self.pool_backlog = backlog;
        self
    }
}

/// 分层时间轮。
pub struct TimingWheel {
    level: Arc<Level>,
    queue: Arc<DelayQueue>,
    pool: Arc<WorkerPool>,
    exit_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
    self_weak: Weak<TimingWheel>,
}

// 内部字段含定时器闭包（`dyn Fn`），无法结构化派生 Debug；
// 仅用于测试断言（如 `Result::unwrap_err`）打印错误分支。
impl std::fmt::Debug for TimingWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl TimingWheel {
    pub fn new(
        tick: Duration,
        wheel_size: i64,
        opts: WheelOptions,
    ) -> DispatcherResult<Arc<Self>> {
        let tick_ms = tick.as_millis() as i64;
        if tick_ms < 1 {
            return Err(DispatcherError::Configuration(
                "时间轮tick不能小于1毫秒".to_string(),
            ));
        }
        if wheel_size <= 0 {
            return Err(DispatcherError::Configuration(format!(
                "时间轮槽数必须为正数: {wheel_size}"
            )));
        }
        let queue = Arc::new(DelayQueue::new());
        let level = Level::new(tick_ms, wheel_size, now_ms(), queue.clone());
        let (exit_tx, _) = broadcast::channel(1);
        Ok(Arc::new_cyclic(|weak| Self {
            level,
            queue,
            pool: WorkerPool::new(opts.pool_size, opts.pool_backlog),
            exit_tx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            self_weak: weak.clone(),
        }))
    }

    /// 启动轮询循环与冲刷循环。重复调用是空操作。
    pub fn start(&self) -> DispatcherResult<()> {
        let Some(this) = self.self_weak.upgrade() else {
            return Err(DispatcherError::WheelStopped);
        };
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatcherError::WheelStopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pool.start();

        let (tx, mut rx) = mpsc::channel::<Arc<Bucket>>(self.level.wheel_size as usize);

        let queue = self.queue.clone();
        let exit = self.exit_tx.subscribe();
        let poll_handle = tokio::spawn(async move {
            queue.poll(tx, exit).await;
        });

        let mut exit = self.exit_tx.subscribe();
        let flush_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        let Some(bucket) = maybe else { return };
                        this.level.advance_clock(bucket.expiration());
                        bucket.flush(|t| {
                            if let Err(e) = this.add_or_run(&t) {
                                error!(error = %e, expiration = t.expiration(), "重新插入定时器失败");
                            }
                        });
                    }
                    _ = exit.recv() => return,
                }
            }
        });

        self.handles
            .lock()
            .unwrap()
            .extend([poll_handle, flush_handle]);
        Ok(())
    }

    /// 关闭退出通道，等待在途闭包执行完毕并释放工作池。幂等。
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.exit_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
        self.pool.shutdown().await;
    }

    /// 插入定时器，已过期时立即提交执行
    fn add_or_run(&self, t: &Arc<Timer>) -> DispatcherResult<()> {
        if !self.level.add(t) {
            self.pool.try_submit((t.task())())?;
        }
        Ok(())
    }

    /// 在 now + delay 触发一次 f。返回的定时器可用 stop 取消。
    pub fn after_func(&self, delay: Duration, f: TimerTask) -> DispatcherResult<Arc<Timer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatcherError::WheelStopped);
        }
        let t = Arc::new(Timer::new(now_ms() + delay.as_millis() as i64, f));
        self.add_or_run(&t)?;
        Ok(t)
    }

    /// 按执行计划反复触发 f。每次触发前先向计划询问下一次执行时间
    /// 并重新编排自身，计划返回 None 时链条终止。
    pub fn schedule_func(
        &self,
        scheduler: Arc<dyn Scheduler>,
        f: TimerTask,
    ) -> DispatcherResult<Arc<Timer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatcherError::WheelStopped);
        }
        let first = scheduler.next(Utc::now()).ok_or_else(|| {
            DispatcherError::Configuration("执行计划未给出首次执行时间".to_string())
        })?;

        let wheel = self.self_weak.clone();
        let timer = Arc::new_cyclic(|weak_timer: &Weak<Timer>| {
            let weak_timer = weak_timer.clone();
            let task: TimerTask = Arc::new(move || -> TimerFuture {
                let weak_timer = weak_timer.clone();
                let wheel = wheel.clone();
                let scheduler = scheduler.clone();
                let f = f.clone();
                Box::pin(async move {
                    // 先重新编排，再执行本次任务
                    if let (Some(timer), Some(wheel)) = (weak_timer.upgrade(), wheel.upgrade()) {
                        if let Some(next) = scheduler.next(ms_to_utc(timer.expiration())) {
                            timer.set_expiration(to_ms(next));
                            if let Err(e) = wheel.add_or_run(&timer) {
                                error!(error = %e, "重新编排定时任务失败");
                            }
                        }
                    }
                    f().await;
                })
            });
            Timer::new(to_ms(first), task)
        });
        self.add_or_run(&timer)?;
        Ok(timer)
    }
}

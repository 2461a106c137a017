//! 定时器。到期时间为毫秒时间戳，任务为可重复调用的异步闭包。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, Weak};

use crate::bucket::Bucket;

/// 定时器任务产生的 future
pub type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 定时器任务。重复调度会多次调用，因此是 Fn 而非 FnOnce。
pub type TimerTask = std::sync::Arc<dyn Fn() -> TimerFuture + Send + Sync>;

/// 把异步闭包包装成定时器任务
pub fn task_fn<F, Fut>(f: F) -> TimerTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    std::sync::Arc::new(move || -> TimerFuture { Box::pin(f()) })
}

/// 一个已编排的定时器。
///
/// 同一时刻至多归属一个槽；`stop` 尝试从当前槽移除。触发与取消的
/// 并发竞态由调用方自行承担：`stop` 返回 false 不代表任务一定已经
/// 执行，只代表本次调用没有移除到任何槽内成员。
pub struct Timer {
    expiration_ms: AtomicI64,
    task: TimerTask,
    bucket: Mutex<Weak<Bucket>>,
}

impl Timer {
    pub fn new(expiration_ms: i64, task: TimerTask) -> Self {
        Self {
            expiration_ms: AtomicI64::new(expiration_ms),
            task,
            bucket: Mutex::new(Weak::new()),
        }
    }

    pub fn expiration(&self) -> i64 {
        self.expiration_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn set_expiration(&self, ms: i64) {
        self.expiration_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn task(&self) -> TimerTask {
        self.task.clone()
    }

    pub(crate) fn set_bucket(&self, b: Weak<Bucket>) {
        *self.bucket.lock().unwrap() = b;
    }

    /// 仅在仍指向 b 时清除归属，避免清掉并发迁移后的新归属
    pub(crate) fn clear_bucket(&self, b: &Weak<Bucket>) {
        let mut guard = self.bucket.lock().unwrap();
        if Weak::ptr_eq(&guard, b) {
            *guard = Weak::new();
        }
    }

    /// 取消定时器。冲刷过程中定时器可能在槽间迁移，循环直到移除
    /// 成功或定时器已不在任何槽内。
    pub fn stop(&self) -> bool {
        let mut prev: Option<std::sync::Arc<Bucket>> = None;
        loop {
            let bucket = self.bucket.lock().unwrap().upgrade();
            match bucket {
                None => return false,
                Some(b) => {
                    if b.remove(self) {
                        return true;
                    }
                    // 归属未变化说明定时器已被取走执行，放弃
                    if let Some(p) = &prev {
                        if std::sync::Arc::ptr_eq(p, &b) {
                            return false;
                        }
                    }
                    prev = Some(b);
                }
            }
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("expiration_ms", &self.expiration())
            .finish()
    }
}

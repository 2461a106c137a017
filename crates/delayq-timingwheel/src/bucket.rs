//! 时间轮的槽。持有同一 tick 内到期的全部定时器。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::timer::Timer;

/// 槽的到期哨兵，表示本轮周期尚未写入到期时间
const SENTINEL: i64 = -1;

/// 一个槽：定时器列表加一个原子到期时间。
///
/// 到期时间只在从哨兵或旧值变为新值时返回 true，调用方据此决定
/// 是否把槽投入延迟队列，保证同一周期内同一个槽只入队一次。
pub struct Bucket {
    expiration_ms: AtomicI64,
    timers: Mutex<Vec<Arc<Timer>>>,
    self_weak: Weak<Bucket>,
}

impl Bucket {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            expiration_ms: AtomicI64::new(SENTINEL),
            timers: Mutex::new(Vec::new()),
            self_weak: weak.clone(),
        })
    }

    pub fn expiration(&self) -> i64 {
        self.expiration_ms.load(Ordering::SeqCst)
    }

    /// 写入到期时间，返回值是否发生变化
    pub fn set_expiration(&self, ms: i64) -> bool {
        self.expiration_ms.swap(ms, Ordering::SeqCst) != ms
    }

    pub fn add(&self, t: &Arc<Timer>) {
        let mut timers = self.timers.lock().unwrap();
        timers.push(t.clone());
        t.set_bucket(self.self_weak.clone());
    }

    /// 移除指定定时器，不在本槽时返回 false
    pub fn remove(&self, t: &Timer) -> bool {
        let mut timers = self.timers.lock().unwrap();
        let before = timers.len();
        timers.retain(|x| !std::ptr::eq(x.as_ref(), t));
        let removed = timers.len() < before;
        if removed {
            t.clear_bucket(&self.self_weak);
        }
        removed
    }

    /// 取出全部定时器，重置哨兵，再逐个交给 reinsert。
    /// 取出与归属清除在同一把锁下完成，取消操作不会观察到中间态。
    pub fn flush(&self, mut reinsert: impl FnMut(Arc<Timer>)) {
        let drained: Vec<Arc<Timer>> = {
            let mut timers = self.timers.lock().unwrap();
            let drained: Vec<Arc<Timer>> = timers.drain(..).collect();
            for t in &drained {
                t.clear_bucket(&self.self_weak);
            }
            drained
        };
        self.set_expiration(SENTINEL);
        for t in drained {
            reinsert(t);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

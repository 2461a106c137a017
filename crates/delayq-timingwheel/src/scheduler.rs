//! 重复定时器的执行计划。

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// 执行计划。每次触发前询问下一次执行时间，返回 None 终止链条。
pub trait Scheduler: Send + Sync {
    fn next(&self, prev: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// 固定间隔
pub struct EveryScheduler {
    pub interval: Duration,
}

impl Scheduler for EveryScheduler {
    fn next(&self, prev: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(prev + chrono::Duration::from_std(self.interval).ok()?)
    }
}

/// 按给定序列退避，序列耗尽后终止
pub struct BackoffScheduler {
    intervals: Vec<Duration>,
    current: Mutex<usize>,
}

impl BackoffScheduler {
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self {
            intervals,
            current: Mutex::new(0),
        }
    }
}

impl Scheduler for BackoffScheduler {
    fn next(&self, prev: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut current = self.current.lock().unwrap();
        let interval = *self.intervals.get(*current)?;
        *current += 1;
        Some(prev + chrono::Duration::from_std(interval).ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scheduler() {
        let s = EveryScheduler {
            interval: Duration::from_secs(10),
        };
        let t0 = Utc::now();
        let t1 = s.next(t0).unwrap();
        assert_eq!(t1 - t0, chrono::Duration::seconds(10));
    }

    #[test]
    fn test_backoff_scheduler_terminates() {
        let s = BackoffScheduler::new(vec![Duration::from_secs(2), Duration::from_secs(16)]);
        let t0 = Utc::now();
        let t1 = s.next(t0).unwrap();
        assert_eq!(t1 - t0, chrono::Duration::seconds(2));
        let t2 = s.next(t1).unwrap();
        assert_eq!(t2 - t1, chrono::Duration::seconds(16));
        assert!(s.next(t2).is_none());
    }
}

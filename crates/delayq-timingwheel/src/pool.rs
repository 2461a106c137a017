//! 有界工作池。
//!
//! 固定数量的工作任务消费同一条有界通道。通道写满时 `try_submit`
//! 立刻报错，不做无界排队。每个任务在执行边界做 panic 捕获，
//! 记录 panic 内容与调用栈后继续消费。

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::error;

use crate::timer::TimerFuture;
use delayq_errors::{DispatcherError, DispatcherResult};

pub struct WorkerPool {
    size: usize,
    tx: Mutex<Option<mpsc::Sender<TimerFuture>>>,
    rx: Mutex<Option<mpsc::Receiver<TimerFuture>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerPool {
    /// size 为并发工作任务数，backlog 为等待队列容量
    pub fn new(size: usize, backlog: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        Arc::new(Self {
            size: size.max(1),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            handles: Mutex::new(Vec::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 预创建全部工作任务。重复调用是空操作。
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = self.handles.lock().unwrap();
        for _ in 0..self.size {
            let rx = rx.clone();
            let shutting_down = self.shutting_down.clone();
            handles.push(tokio::spawn(worker(rx, shutting_down)));
        }
    }

    /// 提交一个任务，池满或已关闭时同步报错
    pub fn try_submit(&self, job: TimerFuture) -> DispatcherResult<()> {
        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return Err(DispatcherError::WheelStopped);
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => DispatcherError::PoolSaturated,
            TrySendError::Closed(_) => DispatcherError::WheelStopped,
        })
    }

    /// 关闭：在途任务跑完，排队中尚未开始的任务丢弃
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
    }
}

async fn worker(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TimerFuture>>>,
    shutting_down: Arc<AtomicBool>,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            return;
        };
        if shutting_down.load(Ordering::SeqCst) {
            continue;
        }
        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
            let msg = panic_message(panic.as_ref());
            error!(
                panic = %msg,
                backtrace = %Backtrace::force_capture(),
                "定时任务执行发生panic"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

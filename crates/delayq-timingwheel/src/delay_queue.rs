//! 槽的并发延迟队列。
//!
//! 按到期毫秒时间戳排序的优先队列，为时间轮的 tick 循环供料。
//! `poll` 在队首到期时把槽投递到输出通道，否则睡到队首到期、被更早
//! 的新元素唤醒或收到退出信号。

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};

use crate::bucket::Bucket;
use delayq_common::time::now_ms;

struct Entry {
    expiration: i64,
    /// 同到期时间的 FIFO 序号
    seq: u64,
    bucket: Arc<Bucket>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.expiration == other.expiration && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.expiration, self.seq).cmp(&(other.expiration, other.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

pub struct DelayQueue {
    inner: Mutex<Inner>,
    wakeup: Notify,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            wakeup: Notify::new(),
        }
    }

    /// 投入一个槽。只有当它成为新的队首时才唤醒轮询方。
    pub fn offer(&self, bucket: Arc<Bucket>, expiration: i64) {
        let is_new_head = {
            let mut inner = self.inner.lock().unwrap();
            let is_new_head = inner
                .heap
                .peek()
                .map_or(true, |Reverse(head)| expiration < head.expiration);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Reverse(Entry {
                expiration,
                seq,
                bucket,
            }));
            is_new_head
        };
        if is_new_head {
            self.wakeup.notify_one();
        }
    }

    /// 阻塞轮询。到期的槽按顺序投递给 tx；收到退出信号或对端关闭
    /// 时干净返回。
    pub async fn poll(&self, tx: mpsc::Sender<Arc<Bucket>>, mut exit: broadcast::Receiver<()>) {
        loop {
            let now = now_ms();
            enum Next {
                Due(Arc<Bucket>),
                Sleep(i64),
                Empty,
            }
            let next = {
                let mut inner = self.inner.lock().unwrap();
                let head_expiration = inner.heap.peek().map(|Reverse(head)| head.expiration);
                match head_expiration {
                    Some(expiration) if expiration <= now => {
                        let Reverse(entry) = inner.heap.pop().unwrap();
                        Next::Due(entry.bucket)
                    }
                    Some(expiration) => Next::Sleep(expiration - now),
                    None => Next::Empty,
                }
            };
            match next {
                Next::Due(bucket) => {
                    tokio::select! {
                        res = tx.send(bucket) => {
                            if res.is_err() {
                                return;
                            }
                        }
                        _ = exit.recv() => return,
                    }
                }
                Next::Sleep(ms) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(ms as u64)) => {}
                        _ = self.wakeup.notified() => {}
                        _ = exit.recv() => return,
                    }
                }
                Next::Empty => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = exit.recv() => return,
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_delivers_in_expiration_order() {
        let q = Arc::new(DelayQueue::new());
        let base = now_ms();
        let (b1, b2, b3) = (Bucket::new(), Bucket::new(), Bucket::new());
        b1.set_expiration(base + 90);
        b2.set_expiration(base + 30);
        b3.set_expiration(base + 60);
        q.offer(b1.clone(), base + 90);
        q.offer(b2.clone(), base + 30);
        q.offer(b3.clone(), base + 60);

        let (tx, mut rx) = mpsc::channel(8);
        let (exit_tx, _) = broadcast::channel(1);
        let q2 = q.clone();
        let exit = exit_tx.subscribe();
        let handle = tokio::spawn(async move { q2.poll(tx, exit).await });

        let mut got = Vec::new();
        for _ in 0..3 {
            let b = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("延迟队列超时未投递")
                .unwrap();
            got.push(b.expiration());
        }
        assert_eq!(got, vec![base + 30, base + 60, base + 90]);
        assert_eq!(q.len(), 0);

        let _ = exit_tx.send(());
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_poll_exits_on_signal() {
        let q = Arc::new(DelayQueue::new());
        let (tx, _rx) = mpsc::channel(1);
        let (exit_tx, _) = broadcast::channel(1);
        let exit = exit_tx.subscribe();
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.poll(tx, exit).await });
        let _ = exit_tx.send(());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("轮询循环未随退出信号结束")
            .unwrap();
    }

    #[tokio::test]
    async fn test_earlier_offer_wakes_sleeper() {
        let q = Arc::new(DelayQueue::new());
        let base = now_ms();
        let far = Bucket::new();
        far.set_expiration(base + 5_000);
        q.offer(far, base + 5_000);

        let (tx, mut rx) = mpsc::channel(2);
        let (exit_tx, _) = broadcast::channel(1);
        let exit = exit_tx.subscribe();
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.poll(tx, exit).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let near = Bucket::new();
        near.set_expiration(base + 100);
        q.offer(near, base + 100);

        let b = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("更早元素未唤醒轮询方")
            .unwrap();
        assert_eq!(b.expiration(), base + 100);

        let _ = exit_tx.send(());
        let _ = handle.await;
    }
}

//! 分层时间轮。
//!
//! 每层由 tick 和 wheel_size 决定覆盖区间 `interval = tick * wheel_size`，
//! 到期时间落在本层区间内的定时器进入 `(expiration / tick) % wheel_size`
//! 号槽，超出区间的递归进入 tick 为父层 interval 的上层轮。上层轮懒创建，
//! 每层至多一次，发布在一次性写单元上，读端无锁。
//!
//! 槽的到期时间是带 `-1` 哨兵的原子值，仅在值发生变化（即本轮周期首次
//! 写入）时把槽投入共享延迟队列，同周期的后续插入不重复入队。
//!
//! 单个轮询循环按到期顺序取出槽，推进所属层及上层的当前时间，然后冲刷
//! 槽内定时器：未到期的重新插入（上层降级到下层），到期的提交给有界
//! 工作池执行。工作池在任务边界做 panic 捕获并记录调用栈。

pub mod bucket;
pub mod delay_queue;
pub mod pool;
pub mod scheduler;
pub mod timer;
pub mod wheel;

pub use bucket::Bucket;
pub use delay_queue::DelayQueue;
pub use pool::WorkerPool;
pub use scheduler::{BackoffScheduler, EveryScheduler, Scheduler};
pub use timer::{task_fn, Timer, TimerFuture, TimerTask};
pub use wheel::{TimingWheel, WheelOptions};

pub use delayq_errors::{DispatcherError, DispatcherResult};

//! 任务队列的持久化实现。
//!
//! 生产路径是 Postgres，认领查询依赖 `FOR UPDATE SKIP LOCKED`；
//! 内存实现保持同样的谓词语义，供嵌入式运行和测试使用。

pub mod database;
pub mod memory;

pub use database::{connect, PostgresTaskStore};
pub use memory::MemoryTaskStore;

pub use delayq_errors::{DispatcherError, DispatcherResult};

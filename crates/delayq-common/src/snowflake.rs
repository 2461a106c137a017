//! 雪花算法任务号生成器。
//!
//! 64 位布局：41 位毫秒时间戳 + 10 位节点序号 + 12 位毫秒内序列。
//! 以节点序号做种子，保证任务号全集群唯一；同一进程内由互斥锁串行化。

use std::sync::Mutex;

use crate::time::now_ms;
use delayq_errors::{DispatcherError, DispatcherResult};

const NODE_BITS: u8 = 10;
const SEQ_BITS: u8 = 12;
const NODE_MAX: i64 = (1 << NODE_BITS) - 1;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;
const TIME_SHIFT: u8 = NODE_BITS + SEQ_BITS;

/// 自定义纪元（2010-11-04T01:42:54.657Z）
const EPOCH_MS: i64 = 1_288_834_974_657;

#[derive(Debug)]
pub struct SnowflakeNode {
    node: i64,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    last_ms: i64,
    seq: i64,
}

impl SnowflakeNode {
    pub fn new(node: i64) -> DispatcherResult<Self> {
        if !(0..=NODE_MAX).contains(&node) {
            return Err(DispatcherError::Configuration(format!(
                "节点序号必须在 0..={NODE_MAX} 之间: {node}"
            )));
        }
        Ok(Self {
            node,
            state: Mutex::new(State { last_ms: 0, seq: 0 }),
        })
    }

    pub fn node(&self) -> i64 {
        self.node
    }

    /// 生成下一个任务号。毫秒内序列耗尽时自旋等待下一毫秒。
    pub fn generate(&self) -> i64 {
        let mut st = self.state.lock().unwrap();
        let mut now = now_ms();
        if now == st.last_ms {
            st.seq = (st.seq + 1) & SEQ_MASK;
            if st.seq == 0 {
                while now <= st.last_ms {
                    now = now_ms();
                }
            }
        } else {
            st.seq = 0;
        }
        st.last_ms = now;
        ((now - EPOCH_MS) << TIME_SHIFT) | (self.node << SEQ_BITS) | st.seq
    }
}

//! 集群成员发现。
//!
//! 每个节点从 StatefulSet 的 Pod 名尾号得到自己的序号，并据存活
//! 序号列表解析出半开归属区间 `(lo, hi]`。成员集合有两个最终一致的
//! 更新来源：Pod watch 事件流，以及按固定周期的全量拉取兜底。

pub mod backend;
pub mod members;
pub mod pod;
pub mod range;

pub use backend::{KubeBackend, MembershipBackend, PodEvent, PodEventStream};
pub use members::{pull_members, watch_members, StatefulSetMembers};
pub use pod::{current_pod_ordinal, is_in_pod, parse_ordinal};
pub use range::resolve_range;

pub use delayq_errors::{DispatcherError, DispatcherResult};

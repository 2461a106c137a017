//! 节点归属区间解析。
//!
//! 在升序存活序号列表前补哨兵 -1，找到第一个不小于本节点序号的
//! 元素，它的前驱是区间左端；若它是最后一个元素则右端无界。这样
//! 每个存活节点得到一段互不重叠的 locked_by 区间，并集覆盖全部
//! 正整数。查找用二分而非线性扫描。

use delayq_common::OwnershipRange;

/// 由存活序号列表解析本节点的归属区间。
/// 空列表退化为单节点集合 `[self_ordinal]`。
pub fn resolve_range(self_ordinal: i64, live: &[i64]) -> OwnershipRange {
    let mut sorted: Vec<i64> = if live.is_empty() {
        vec![self_ordinal]
    } else {
        live.to_vec()
    };
    sorted.sort_unstable();
    sorted.dedup();

    // 第一个 >= self_ordinal 的下标
    let idx = sorted.partition_point(|&x| x < self_ordinal);

    let lo = if idx == 0 { -1 } else { sorted[idx - 1] };
    let hi = if idx >= sorted.len() - 1 || idx == sorted.len() {
        i64::MAX
    } else {
        sorted[idx]
    };
    OwnershipRange::new(lo, hi)
}

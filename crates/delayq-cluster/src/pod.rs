//! Pod 名与节点序号。
//!
//! StatefulSet 的 Pod 名以 `-N` 结尾，N 即节点序号。Pod 名优先取
//! downward API 注入的 POD_NAME，缺省退回 HOSTNAME。

use delayq_errors::{DispatcherError, DispatcherResult};

/// 是否运行在 Kubernetes Pod 内
pub fn is_in_pod() -> bool {
    std::env::var("KUBERNETES_SERVICE_HOST").is_ok_and(|v| !v.is_empty())
        && std::env::var("KUBERNETES_SERVICE_PORT").is_ok_and(|v| !v.is_empty())
}

/// 解析名字末段的数字序号
pub fn parse_ordinal(name: &str) -> Option<i64> {
    let last = name.rsplit('-').next()?;
    last.parse::<i64>().ok()
}

/// 当前节点序号。不在 Pod 内时返回 0，交由配置覆盖。
pub fn current_pod_ordinal() -> DispatcherResult<i64> {
    if !is_in_pod() {
        return Ok(0);
    }
    let pod_name = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .map_err(|_| {
            DispatcherError::Membership("无法获取 Pod 名：POD_NAME 与 HOSTNAME 均未设置".to_string())
        })?;
    parse_ordinal(&pod_name).ok_or_else(|| {
        DispatcherError::Membership(format!("Pod 名不含序号后缀: {pod_name}"))
    })
}

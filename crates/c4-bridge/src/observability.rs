//! 日志目标与桥接层计数器。
//!
//! # 设计缘起（Why）
//! - 桥接层运行在原生引擎的 I/O 线程上，任何失败都不能向上抛到原生代码，只能落到日志与计数器；
//! - 日志统一使用 [`LOG_TARGET`]，对应原生侧的 `NETWORK` 日志域，便于宿主按目标过滤。
//!
//! # 契约约束（What）
//! - [`BridgeMetrics`] 只做单调递增的原子计数，读取通过 [`BridgeMetrics::snapshot`] 一次性拷贝；
//! - 计数器使用 `Relaxed` 序：它们是观测数据，不参与任何同步决策。

use std::sync::atomic::{AtomicU64, Ordering};

/// 所有桥接日志使用的 `tracing` 目标。
pub const LOG_TARGET: &str = "c4_bridge::network";

/// 桥接层运行期计数器。
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    registered: AtomicU64,
    disposed: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    invariant_violations: AtomicU64,
    attach_failures: AtomicU64,
}

/// [`BridgeMetrics`] 的只读快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MetricsSnapshot {
    pub registered: u64,
    pub disposed: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub invariant_violations: u64,
    pub attach_failures: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disposed(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attach_failure(&self) {
        self.attach_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            attach_failures: self.attach_failures.load(Ordering::Relaxed),
        }
    }
}

/// 安装 `fmt + EnvFilter` 全局 Subscriber。
///
/// # 教案式说明
/// - **意图（Why）**：宿主进程若没有自己的 tracing 管线，可一键获得桥接日志输出；
/// - **逻辑（How）**：`RUST_LOG` 存在时按其过滤，否则默认 `info`；
/// - **契约（What）**：全局 Subscriber 已被设置时返回错误，不会覆盖宿主配置。
#[cfg(feature = "subscriber")]
pub fn install_fmt_subscriber() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = BridgeMetrics::new();
        metrics.record_registered();
        metrics.record_registered();
        metrics.record_disposed();
        metrics.record_dropped();
        let snap = metrics.snapshot();
        assert_eq!(snap.registered, 2);
        assert_eq!(snap.disposed, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.invariant_violations, 0);
    }
}

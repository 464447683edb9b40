//! # 引用与生命周期协调
//!
//! ## 核心意图（Why）
//! - 原生侧与托管侧各自从不同线程 retain/release 同一句柄，拆除必须恰好发生一次；
//! - 每个句柄一把互斥锁（`parking_lot::Mutex`，`--cfg loom` 下为 Loom 实现），保护状态机、引用计数与流控计数；不同句柄之间互不竞争。
//!
//! ## 引用模型（What）
//! - 创建时原生侧持有一份引用（`native_ref`），在 `onClosed` 处理完毕后由调度器释放；
//! - 托管侧每次 [`HandleLifecycle::retain`] 增加一份，必须以 [`HandleLifecycle::release`] 配对归还；
//! - 两类引用全部归零且状态为 `Closed` 时，持锁完成 `Closed → Disposed` 跃迁并产出唯一的 [`Teardown`]，
//!   由 [`LifecycleCoordinator`] 在锁外执行注销、释放 [`PinToken`] 与原生缓冲。
//!
//! ## 不变量破坏
//! - 释放已拆除句柄、无匹配 retain 的 release、`onClosed` 之后的 retain、重复 `onClosed`
//!   均返回 [`BridgeError::InvariantViolation`]，并记录 `error` 日志与计数。

use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::NativeBuffer;
use crate::error::BridgeError;
use crate::handle::TransportHandle;
use crate::observability::{BridgeMetrics, LOG_TARGET};
use crate::registry::{HandleEntry, HandleRegistry, PinToken};
use crate::state::SocketState;
use crate::sync::Mutex;
use crate::target::CallbackTarget;

#[derive(Debug)]
struct PendingReceive {
    remaining: usize,
    buffer: Option<NativeBuffer>,
}

#[derive(Debug)]
struct LifecycleInner {
    state: SocketState,
    native_ref: bool,
    managed_refs: usize,
    open_dispatched: bool,
    managed_ready: bool,
    managed_closed: bool,
    managed_close_requested: bool,
    pending_write: usize,
    unacked_receive: usize,
    receives: VecDeque<PendingReceive>,
    pin: Option<PinToken>,
}

impl LifecycleInner {
    fn retain_count(&self) -> usize {
        usize::from(self.native_ref) + self.managed_refs
    }

    fn pinned_target(&self, handle: TransportHandle) -> Result<Arc<dyn CallbackTarget>, BridgeError> {
        self.pin
            .as_ref()
            .map(|pin| Arc::clone(pin.target()))
            .ok_or_else(|| BridgeError::invariant(handle, "callback target is not pinned"))
    }

    fn admit_stream(
        &self,
        handle: TransportHandle,
        event: &'static str,
    ) -> Result<Arc<dyn CallbackTarget>, BridgeError> {
        match self.state {
            state if state.accepts_stream_events() => self.pinned_target(handle),
            SocketState::Created => Err(BridgeError::invariant(
                handle,
                format!("{event} delivered before on_open"),
            )),
            _ => Err(BridgeError::invariant(
                handle,
                format!("{event} dispatched after on_closed"),
            )),
        }
    }

    fn transition(&mut self, target: SocketState) {
        debug_assert!(
            self.state == target || self.state.can_transition_to(target),
            "illegal transition {:?} -> {target:?}",
            self.state
        );
        self.state = target;
    }

    fn try_teardown(&mut self, handle: TransportHandle) -> Option<Teardown> {
        if self.retain_count() != 0 || self.state != SocketState::Closed {
            return None;
        }
        self.transition(SocketState::Disposed);
        self.pending_write = 0;
        self.unacked_receive = 0;
        let buffers = self
            .receives
            .drain(..)
            .filter_map(|pending| pending.buffer)
            .collect();
        Some(Teardown {
            handle,
            pin: self.pin.take(),
            buffers,
        })
    }
}

/// 一次性拆除凭证，只能由引用计数归零的那次调用取得。
#[must_use = "拆除凭证必须交给 LifecycleCoordinator 执行"]
pub struct Teardown {
    handle: TransportHandle,
    pin: Option<PinToken>,
    buffers: Vec<NativeBuffer>,
}

impl Teardown {
    pub fn handle(&self) -> TransportHandle {
        self.handle
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("handle", &self.handle)
            .field("pinned", &self.pin.is_some())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

/// 单个句柄的生命周期状态。
pub struct HandleLifecycle {
    handle: TransportHandle,
    inner: Mutex<LifecycleInner>,
}

impl HandleLifecycle {
    pub(crate) fn new(handle: TransportHandle) -> Self {
        Self {
            handle,
            inner: Mutex::new(LifecycleInner {
                state: SocketState::Created,
                native_ref: true,
                managed_refs: 0,
                open_dispatched: false,
                managed_ready: false,
                managed_closed: false,
                managed_close_requested: false,
                pending_write: 0,
                unacked_receive: 0,
                receives: VecDeque::new(),
                pin: None,
            }),
        }
    }

    pub fn state(&self) -> SocketState {
        self.inner.lock().state
    }

    pub fn retain_count(&self) -> usize {
        self.inner.lock().retain_count()
    }

    /// 已写出但尚未收到 `on_write_completed` 确认的字节数。
    pub fn pending_write_bytes(&self) -> usize {
        self.inner.lock().pending_write
    }

    /// 已投递但尚未 `completed_receive` 的字节数。
    pub fn unacknowledged_receive_bytes(&self) -> usize {
        self.inner.lock().unacked_receive
    }

    pub(crate) fn adopt_pin(&self, pin: PinToken) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        if inner.pin.is_some() {
            return Err(BridgeError::invariant(self.handle, "callback target pinned twice"));
        }
        inner.pin = Some(pin);
        Ok(())
    }

    // ---- 原生 → 托管：事件准入 ----

    pub(crate) fn begin_open(&self) -> Result<Arc<dyn CallbackTarget>, BridgeError> {
        let mut inner = self.inner.lock();
        if inner.state != SocketState::Created {
            return Err(BridgeError::invariant(
                self.handle,
                format!("on_open delivered in state {:?}", inner.state),
            ));
        }
        let target = inner.pinned_target(self.handle)?;
        inner.transition(SocketState::Opening);
        Ok(target)
    }

    /// `on_open` 回调返回后调用；托管侧已确认就绪时进入 `Open`。
    pub(crate) fn finish_open_dispatch(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.open_dispatched = true;
        if inner.state == SocketState::Opening && inner.managed_ready {
            inner.transition(SocketState::Open);
            return true;
        }
        false
    }

    /// `on_open` 未能投递时回退到 `Created`，允许原生侧重新投递。
    pub(crate) fn abort_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SocketState::Opening && !inner.open_dispatched {
            inner.state = SocketState::Created;
        }
    }

    pub(crate) fn admit_write_completed(
        &self,
        byte_count: usize,
    ) -> Result<Arc<dyn CallbackTarget>, BridgeError> {
        let mut inner = self.inner.lock();
        let target = inner.admit_stream(self.handle, "on_write_completed")?;
        if byte_count > inner.pending_write {
            return Err(BridgeError::invariant(
                self.handle,
                format!(
                    "write completion of {byte_count} bytes exceeds {} pending bytes",
                    inner.pending_write
                ),
            ));
        }
        inner.pending_write -= byte_count;
        Ok(target)
    }

    /// 登记入站字节；借用型缓冲随记录保留，直到被确认或拆除。
    pub(crate) fn admit_received(
        &self,
        byte_count: usize,
        retained: Option<NativeBuffer>,
    ) -> Result<Arc<dyn CallbackTarget>, BridgeError> {
        let mut inner = self.inner.lock();
        let target = inner.admit_stream(self.handle, "on_received")?;
        inner.unacked_receive += byte_count;
        inner.receives.push_back(PendingReceive {
            remaining: byte_count,
            buffer: retained,
        });
        Ok(target)
    }

    /// 撤销最近一次 [`Self::admit_received`]；返回其保留的缓冲，由调用方在锁外释放。
    pub(crate) fn abort_received(&self, byte_count: usize) -> Option<NativeBuffer> {
        let mut inner = self.inner.lock();
        if inner.receives.back().map(|pending| pending.remaining) != Some(byte_count) {
            return None;
        }
        inner.unacked_receive -= byte_count;
        inner.receives.pop_back().and_then(|pending| pending.buffer)
    }

    /// 返回目标与之前的状态；投递失败时交给 [`Self::abort_close_requested`] 回退。
    pub(crate) fn admit_close_requested(
        &self,
    ) -> Result<(Arc<dyn CallbackTarget>, SocketState), BridgeError> {
        let mut inner = self.inner.lock();
        let target = inner.admit_stream(self.handle, "on_close_requested")?;
        let prior = inner.state;
        inner.transition(SocketState::ClosePending);
        Ok((target, prior))
    }

    /// 关闭请求未能投递时恢复之前的状态。托管侧在此期间已自行发起关闭的，保持 `ClosePending`。
    pub(crate) fn abort_close_requested(&self, prior: SocketState) {
        let mut inner = self.inner.lock();
        if inner.state == SocketState::ClosePending
            && !inner.managed_closed
            && !inner.managed_close_requested
        {
            inner.state = prior;
        }
    }

    /// 标记 `onClosed` 开始投递；返回目标与之前的状态，用于投递失败时回退。
    pub(crate) fn begin_close(
        &self,
    ) -> Result<(Arc<dyn CallbackTarget>, SocketState), BridgeError> {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return Err(BridgeError::invariant(
                self.handle,
                format!("on_closed delivered twice (state {:?})", inner.state),
            ));
        }
        let target = inner.pinned_target(self.handle)?;
        let prior = inner.state;
        inner.transition(SocketState::Closed);
        Ok((target, prior))
    }

    pub(crate) fn abort_close(&self, prior: SocketState) {
        let mut inner = self.inner.lock();
        if inner.state == SocketState::Closed && inner.native_ref {
            inner.state = prior;
        }
    }

    // ---- 托管 → 原生：调用前的状态校验 ----

    /// 托管侧确认就绪；返回是否需要转发给原生侧。
    pub(crate) fn mark_ready(&self) -> Result<bool, BridgeError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SocketState::Opening if !inner.managed_ready => {
                inner.managed_ready = true;
                if inner.open_dispatched {
                    inner.transition(SocketState::Open);
                }
                Ok(true)
            }
            SocketState::Opening | SocketState::Open => Ok(false),
            state => Err(BridgeError::InvalidState {
                handle: self.handle,
                state,
                operation: "opened",
            }),
        }
    }

    pub(crate) fn check_handshake(&self) -> Result<(), BridgeError> {
        match self.inner.lock().state {
            SocketState::Opening | SocketState::Open => Ok(()),
            state => Err(BridgeError::InvalidState {
                handle: self.handle,
                state,
                operation: "got_http_response",
            }),
        }
    }

    /// 登记出站字节，受 `limit` 约束。
    ///
    /// 尚无未确认字节时，单次写入不受上限约束，避免超大帧永远无法写出。
    pub(crate) fn record_write(&self, byte_count: usize, limit: usize) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        if !inner.state.accepts_stream_events() {
            return Err(BridgeError::InvalidState {
                handle: self.handle,
                state: inner.state,
                operation: "write",
            });
        }
        if inner.pending_write > 0 && inner.pending_write + byte_count > limit {
            return Err(BridgeError::WriteBackpressure {
                handle: self.handle,
                pending: inner.pending_write,
                limit,
            });
        }
        inner.pending_write += byte_count;
        Ok(())
    }

    /// 确认 `byte_count` 字节入站数据；返回已完全确认、可交还原生侧释放的缓冲。
    pub(crate) fn acknowledge_receive(
        &self,
        byte_count: usize,
    ) -> Result<Vec<NativeBuffer>, BridgeError> {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return Err(BridgeError::InvalidState {
                handle: self.handle,
                state: inner.state,
                operation: "completed_receive",
            });
        }
        if byte_count > inner.unacked_receive {
            return Err(BridgeError::invariant(
                self.handle,
                format!(
                    "completed_receive({byte_count}) exceeds {} unacknowledged bytes",
                    inner.unacked_receive
                ),
            ));
        }
        inner.unacked_receive -= byte_count;

        let mut left = byte_count;
        let mut freed = Vec::new();
        while left > 0 {
            let Some(front) = inner.receives.front_mut() else {
                break;
            };
            if front.remaining > left {
                front.remaining -= left;
                break;
            }
            left -= front.remaining;
            if let Some(pending) = inner.receives.pop_front() {
                freed.extend(pending.buffer);
            }
        }
        // 零长度的入站记录不占额度，随确认一并清理。
        while inner.receives.front().is_some_and(|front| front.remaining == 0) {
            if let Some(pending) = inner.receives.pop_front() {
                freed.extend(pending.buffer);
            }
        }
        Ok(freed)
    }

    pub(crate) fn request_close(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return Err(BridgeError::InvalidState {
                handle: self.handle,
                state: inner.state,
                operation: "close_requested",
            });
        }
        inner.managed_close_requested = true;
        inner.transition(SocketState::ClosePending);
        Ok(())
    }

    /// 托管侧完成关闭；只有首次调用且 `onClosed` 尚未投递时需要转发。
    pub(crate) fn mark_managed_closed(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.managed_closed || inner.state.is_closed() {
            return false;
        }
        inner.managed_closed = true;
        inner.transition(SocketState::ClosePending);
        true
    }

    // ---- 引用计数 ----

    pub(crate) fn retain(&self) -> Result<usize, BridgeError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SocketState::Disposed => Err(BridgeError::invariant(
                self.handle,
                "retain on a disposed handle",
            )),
            SocketState::Closed => Err(BridgeError::invariant(
                self.handle,
                "retain after on_closed was dispatched",
            )),
            _ => {
                inner.managed_refs += 1;
                Ok(inner.retain_count())
            }
        }
    }

    pub(crate) fn release(&self) -> Result<Option<Teardown>, BridgeError> {
        let mut inner = self.inner.lock();
        if inner.state == SocketState::Disposed {
            return Err(BridgeError::invariant(
                self.handle,
                "release on a disposed handle",
            ));
        }
        if inner.managed_refs == 0 {
            return Err(BridgeError::invariant(
                self.handle,
                "release without a matching retain",
            ));
        }
        inner.managed_refs -= 1;
        Ok(inner.try_teardown(self.handle))
    }

    pub(crate) fn release_native(&self) -> Result<Option<Teardown>, BridgeError> {
        let mut inner = self.inner.lock();
        if !inner.native_ref {
            return Err(BridgeError::invariant(
                self.handle,
                "native reference released twice",
            ));
        }
        if inner.state != SocketState::Closed {
            return Err(BridgeError::invariant(
                self.handle,
                format!("native reference released in state {:?}", inner.state),
            ));
        }
        inner.native_ref = false;
        Ok(inner.try_teardown(self.handle))
    }
}

impl fmt::Debug for HandleLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HandleLifecycle")
            .field("handle", &self.handle)
            .field("state", &inner.state)
            .field("retain_count", &inner.retain_count())
            .finish()
    }
}

/// 在锁外执行拆除并统一上报不变量破坏。
#[derive(Debug)]
pub struct LifecycleCoordinator {
    registry: Arc<HandleRegistry>,
    metrics: Arc<BridgeMetrics>,
}

impl LifecycleCoordinator {
    pub fn new(registry: Arc<HandleRegistry>, metrics: Arc<BridgeMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    /// 托管侧为即将开始的异步操作增加一份引用。
    pub fn retain(&self, entry: &HandleEntry) -> Result<usize, BridgeError> {
        entry
            .lifecycle()
            .retain()
            .map_err(|err| self.report(err))
    }

    /// 托管侧归还一份引用；归零时执行拆除。
    pub fn release(&self, entry: &HandleEntry) -> Result<(), BridgeError> {
        let teardown = entry
            .lifecycle()
            .release()
            .map_err(|err| self.report(err))?;
        if let Some(teardown) = teardown {
            self.teardown(teardown);
        }
        Ok(())
    }

    /// 释放创建时原生侧持有的引用；只在 `onClosed` 处理完毕后调用。
    pub fn release_native(&self, entry: &HandleEntry) -> Result<(), BridgeError> {
        let teardown = entry
            .lifecycle()
            .release_native()
            .map_err(|err| self.report(err))?;
        if let Some(teardown) = teardown {
            self.teardown(teardown);
        }
        Ok(())
    }

    fn teardown(&self, teardown: Teardown) {
        let Teardown {
            handle,
            pin,
            buffers,
        } = teardown;
        if !self.registry.unregister(handle) {
            tracing::error!(target: LOG_TARGET, %handle, "teardown found no registry entry");
            self.metrics.record_invariant_violation();
        }
        drop(pin);
        let freed = buffers.len();
        drop(buffers);
        self.metrics.record_disposed();
        tracing::debug!(target: LOG_TARGET, %handle, freed_buffers = freed, "transport disposed");
    }

    /// 记录错误；不变量破坏以 `error` 级别输出并计数。
    pub(crate) fn report(&self, err: BridgeError) -> BridgeError {
        if err.is_invariant_violation() {
            self.metrics.record_invariant_violation();
            tracing::error!(target: LOG_TARGET, code = err.code(), error = %err, "bridge invariant violated");
        } else {
            tracing::debug!(target: LOG_TARGET, code = err.code(), error = %err, "bridge call rejected");
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Address;
    use crate::manager::SocketPeer;
    use crate::translate::ManagedError;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Inert;

    impl CallbackTarget for Inert {
        fn on_open(&self, _: &SocketPeer, _: &Address, _: &Bytes) {}
        fn on_write_completed(&self, _: &SocketPeer, _: usize) {}
        fn on_received(&self, _: &SocketPeer, _: Bytes) {}
        fn on_close_requested(&self, _: &SocketPeer, _: i32, _: &str) {}
        fn on_closed(&self, _: &SocketPeer, _: &ManagedError) {}
    }

    fn setup(raw: u64) -> (LifecycleCoordinator, Arc<HandleEntry>) {
        let registry = Arc::new(HandleRegistry::new());
        let handle = TransportHandle::from_raw(raw).expect("测试句柄非零");
        let registration = registry
            .register(handle, Arc::new(Inert))
            .expect("注册成功");
        registration
            .entry
            .lifecycle()
            .adopt_pin(registration.pin)
            .expect("首次钉住成功");
        let coordinator = LifecycleCoordinator::new(registry, Arc::new(BridgeMetrics::new()));
        (coordinator, registration.entry)
    }

    fn close(entry: &HandleEntry) {
        let lifecycle = entry.lifecycle();
        lifecycle.begin_open().expect("on_open 准入");
        lifecycle.finish_open_dispatch();
        lifecycle.begin_close().expect("on_closed 准入");
    }

    #[test]
    fn native_release_after_close_disposes() {
        let (coordinator, entry) = setup(1);
        assert_eq!(entry.lifecycle().retain_count(), 1);
        close(&entry);
        coordinator.release_native(&entry).expect("首次释放成功");
        assert_eq!(entry.lifecycle().state(), SocketState::Disposed);
        assert!(entry.target().is_none());
        assert!(coordinator.registry().is_empty());
        assert_eq!(coordinator.metrics().snapshot().disposed, 1);

        let err = coordinator
            .release(&entry)
            .expect_err("拆除后释放必须报告不变量破坏");
        assert!(err.is_invariant_violation());
        assert_eq!(coordinator.metrics().snapshot().disposed, 1);
    }

    #[test]
    fn managed_reference_defers_teardown() {
        let (coordinator, entry) = setup(2);
        assert_eq!(coordinator.retain(&entry).expect("retain"), 2);
        close(&entry);
        let err = coordinator.retain(&entry).expect_err("onClosed 之后拒绝 retain");
        assert!(err.is_invariant_violation());

        coordinator.release_native(&entry).expect("原生引用释放");
        assert_eq!(entry.lifecycle().state(), SocketState::Closed);
        assert!(coordinator.registry().contains(entry.handle()));

        coordinator.release(&entry).expect("托管引用释放");
        assert_eq!(entry.lifecycle().state(), SocketState::Disposed);
        assert!(!coordinator.registry().contains(entry.handle()));
    }

    #[test]
    fn unmatched_release_never_goes_negative() {
        let (coordinator, entry) = setup(3);
        let err = coordinator.release(&entry).expect_err("无匹配 retain");
        assert!(err.is_invariant_violation());
        assert_eq!(entry.lifecycle().retain_count(), 1);
        assert_eq!(coordinator.metrics().snapshot().invariant_violations, 1);
    }

    #[test]
    fn receive_acknowledgement_frees_borrowed_buffers() {
        let (_coordinator, entry) = setup(4);
        let lifecycle = entry.lifecycle();
        lifecycle.begin_open().expect("on_open 准入");

        let released = Arc::new(AtomicUsize::new(0));
        let make = |len: usize| {
            let released = Arc::clone(&released);
            NativeBuffer::borrowed(vec![0u8; len]).with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
        };
        lifecycle.admit_received(30, Some(make(30))).expect("入站 30");
        lifecycle.admit_received(20, Some(make(20))).expect("入站 20");
        assert_eq!(lifecycle.unacknowledged_receive_bytes(), 50);

        let freed = lifecycle.acknowledge_receive(40).expect("部分确认");
        assert_eq!(freed.len(), 1);
        drop(freed);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.unacknowledged_receive_bytes(), 10);

        let err = lifecycle.acknowledge_receive(11).expect_err("超额确认");
        assert!(err.is_invariant_violation());

        drop(lifecycle.acknowledge_receive(10).expect("剩余确认"));
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn write_backpressure_is_bounded() {
        let (_coordinator, entry) = setup(5);
        let lifecycle = entry.lifecycle();
        assert!(matches!(
            lifecycle.record_write(10, 100),
            Err(BridgeError::InvalidState { operation: "write", .. })
        ));
        lifecycle.begin_open().expect("on_open 准入");
        lifecycle.record_write(150, 100).expect("首个超大写入允许");
        assert!(matches!(
            lifecycle.record_write(1, 100),
            Err(BridgeError::WriteBackpressure { pending: 150, limit: 100, .. })
        ));
        lifecycle.admit_write_completed(150).expect("写确认");
        lifecycle.record_write(60, 100).expect("额度恢复");
        let err = lifecycle.admit_write_completed(61).err().expect("超额写确认");
        assert!(err.is_invariant_violation());
    }
}

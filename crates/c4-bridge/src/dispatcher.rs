//! # CallbackDispatcher：原生 → 托管的五个入口
//!
//! ## 核心意图（Why）
//! - 原生引擎在自己的 I/O 线程上带着句柄回调；调度器负责查找句柄、校验状态、取得托管上下文，
//!   再把事件交给 [`CallbackTarget`]；
//! - 每个入口都返回 `Result`，失败不会越过边界抛回原生代码，只会落到日志与计数器。
//!
//! ## 执行步骤（How）
//! 1. 在 [`HandleRegistry`](crate::registry::HandleRegistry) 中查找句柄；
//!    未知句柄上的 `on_open` 交给 [`SocketFactory`](crate::target::SocketFactory)，
//!    其余事件记录 `warn` 后返回 [`BridgeError::UnknownHandle`]；
//! 2. 由 [`HandleLifecycle`](crate::lifecycle::HandleLifecycle) 准入事件，不合法时返回不变量错误且不投递；
//! 3. 通过 [`AttachmentManager`](crate::runtime::AttachmentManager) 投递；附着失败时事件被丢弃，句柄保持原状；
//! 4. `on_closed` 在回调返回后释放原生引用，引用计数归零时立即拆除。
//!
//! ## 并发契约（What）
//! - 同一句柄的事件由原生引擎串行投递；不同句柄可以在任意线程上并发投递；
//! - 调度器在调用回调目标时不持有任何内部锁，回调可以同步调用 [`SocketPeer`]。

use std::sync::{Arc, Weak};

use crate::buffer::{NativeBuffer, Ownership};
use crate::error::BridgeError;
use crate::handle::{Address, TransportHandle};
use crate::manager::{Shared, SocketPeer};
use crate::observability::LOG_TARGET;
use crate::registry::HandleEntry;
use crate::target::{CallbackTarget, SocketEvent};
use crate::translate::{self, decode_or_placeholder};

/// 原生回调入口集合，可廉价克隆并在任意线程使用。
#[derive(Clone)]
pub struct CallbackDispatcher {
    shared: Arc<Shared>,
}

/// 不延长桥接层寿命的调度器引用，供原生引擎实现持有以避免引用环。
#[derive(Clone, Debug)]
pub struct WeakDispatcher {
    shared: Weak<Shared>,
}

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<CallbackDispatcher> {
        self.shared.upgrade().map(|shared| CallbackDispatcher { shared })
    }
}

impl CallbackDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// 连接建立请求；每个句柄恰好一次，先于其他事件。
    pub fn on_open(
        &self,
        handle: TransportHandle,
        address: Address,
        options: NativeBuffer,
    ) -> Result<(), BridgeError> {
        let mut options = options;
        let options = options
            .transfer_to_managed()
            .map_err(|err| self.shared.coordinator.report(err))?;
        let entry = match self.shared.registry.lookup(handle) {
            Some(entry) => entry,
            None => self.shared.adopt_from_factory(handle, &address, &options)?,
        };
        let target = entry
            .lifecycle()
            .begin_open()
            .map_err(|err| self.shared.coordinator.report(err))?;
        if let Err(err) = self.deliver(&entry, target, SocketEvent::Open { address, options }) {
            entry.lifecycle().abort_open();
            return Err(err);
        }
        if entry.lifecycle().finish_open_dispatch() {
            tracing::debug!(target: LOG_TARGET, %handle, "transport open");
        }
        Ok(())
    }

    /// 先前写出的 `byte_count` 字节已刷出。
    pub fn on_write_completed(
        &self,
        handle: TransportHandle,
        byte_count: usize,
    ) -> Result<(), BridgeError> {
        let entry = self.shared.lookup(handle, "on_write_completed")?;
        let target = entry
            .lifecycle()
            .admit_write_completed(byte_count)
            .map_err(|err| self.shared.coordinator.report(err))?;
        self.deliver(&entry, target, SocketEvent::WriteCompleted { byte_count })
    }

    /// 入站字节。可转移缓冲直接移交托管侧；借用型缓冲被拷贝，原件保留到
    /// `completed_receive` 确认或句柄拆除。
    pub fn on_received(
        &self,
        handle: TransportHandle,
        data: NativeBuffer,
    ) -> Result<(), BridgeError> {
        let entry = self.shared.lookup(handle, "on_received")?;
        let mut data = data;
        let byte_count = data.len();
        let bytes = data
            .transfer_to_managed()
            .map_err(|err| self.shared.coordinator.report(err))?;
        let retained = match data.ownership() {
            Ownership::Borrowed => Some(data),
            Ownership::Transferable => None,
        };
        let target = entry
            .lifecycle()
            .admit_received(byte_count, retained)
            .map_err(|err| self.shared.coordinator.report(err))?;
        if let Err(err) = self.deliver(&entry, target, SocketEvent::Received { data: bytes }) {
            drop(entry.lifecycle().abort_received(byte_count));
            return Err(err);
        }
        Ok(())
    }

    /// 对端或原生侧请求关闭。
    pub fn on_close_requested(
        &self,
        handle: TransportHandle,
        status: i32,
        message: &[u8],
    ) -> Result<(), BridgeError> {
        let entry = self.shared.lookup(handle, "on_close_requested")?;
        let (target, prior) = entry
            .lifecycle()
            .admit_close_requested()
            .map_err(|err| self.shared.coordinator.report(err))?;
        let message = decode_or_placeholder(message);
        if let Err(err) = self.deliver(&entry, target, SocketEvent::CloseRequested { status, message }) {
            entry.lifecycle().abort_close_requested(prior);
            return Err(err);
        }
        Ok(())
    }

    /// 终止事件。
    ///
    /// # 教案式注释
    /// - **前置条件**：句柄尚未收到过 `on_closed`；
    /// - **后置条件**：成功返回时状态至少为 `Closed`，原生引用已释放；
    ///   若无托管引用，句柄已拆除并从注册表移除；
    /// - **失败语义**：附着失败时回退状态、保留原生引用，原生侧可以重新投递；
    ///   回调 panic 时原生引用照常释放，panic 继续向调用方传播。
    pub fn on_closed(
        &self,
        handle: TransportHandle,
        domain: i32,
        code: i32,
        message: &[u8],
    ) -> Result<(), BridgeError> {
        let entry = self.shared.lookup(handle, "on_closed")?;
        let error = translate::translate(domain, code, message);
        let (target, prior) = entry
            .lifecycle()
            .begin_close()
            .map_err(|err| self.shared.coordinator.report(err))?;
        let mut unwind = ReleaseOnUnwind {
            shared: &self.shared,
            entry: &entry,
            armed: true,
        };
        let delivered = self.deliver(&entry, target, SocketEvent::Closed { error });
        unwind.armed = false;
        if let Err(err) = delivered {
            entry.lifecycle().abort_close(prior);
            return Err(err);
        }
        self.shared.coordinator.release_native(&entry)
    }

    fn deliver(
        &self,
        entry: &Arc<HandleEntry>,
        target: Arc<dyn CallbackTarget>,
        event: SocketEvent,
    ) -> Result<(), BridgeError> {
        let handle = entry.handle();
        let name = event.name();
        if self.shared.config.log_payload_sizes {
            tracing::debug!(target: LOG_TARGET, %handle, event = name, bytes = payload_size(&event), "dispatching transport event");
        } else {
            tracing::debug!(target: LOG_TARGET, %handle, event = name, "dispatching transport event");
        }

        let peer = SocketPeer::new(Arc::clone(entry), Arc::clone(&self.shared));
        let delivered = self
            .shared
            .attachment
            .with_attached_context(name, |_context| event.deliver(target.as_ref(), &peer));
        drop(target);

        match delivered {
            Ok(()) => {
                self.shared.metrics.record_dispatched();
                Ok(())
            }
            Err(err) => {
                self.shared.metrics.record_dropped();
                tracing::warn!(target: LOG_TARGET, %handle, event = name, code = err.code(), "event dropped");
                Err(err)
            }
        }
    }
}

/// `on_closed` 回调 panic 时仍释放原生引用，保证句柄被拆除。
struct ReleaseOnUnwind<'a> {
    shared: &'a Shared,
    entry: &'a HandleEntry,
    armed: bool,
}

impl Drop for ReleaseOnUnwind<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = self.entry.handle();
        tracing::warn!(target: LOG_TARGET, %handle, "on_closed callback panicked; releasing native reference");
        // 正在展开，错误已由协调器记录。
        let _ = self.shared.coordinator.release_native(self.entry);
    }
}

fn payload_size(event: &SocketEvent) -> usize {
    match event {
        SocketEvent::Open { options, .. } => options.len(),
        SocketEvent::WriteCompleted { byte_count } => *byte_count,
        SocketEvent::Received { data } => data.len(),
        SocketEvent::CloseRequested { message, .. } => message.len(),
        SocketEvent::Closed { error } => error.message().len(),
    }
}

impl core::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("registered", &self.shared.registry.len())
            .finish()
    }
}

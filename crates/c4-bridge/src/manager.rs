//! # TransportManager 与 SocketPeer
//!
//! ## 角色定位（Why）
//! - [`TransportManager`] 把注册表、附着管理器、生命周期协调器与计数器装配成一个独立实例，
//!   同一进程可以并存多个互不干扰的实例；
//! - [`SocketPeer`] 是托管侧回调原生句柄的唯一途径，每次调用前都先经过生命周期校验。
//!
//! ## 并发契约（What）
//! - `SocketPeer` 在调用 [`NativeEngine`] 之前释放所有内部锁，
//!   因此原生引擎可以在同一调用栈内同步回调 [`CallbackDispatcher`]；
//! - [`NativeEngine::create_handle`] 返回之前不得为该句柄投递 `on_open`，
//!   否则调度器会把它当作未知句柄处理。

use core::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::codes::{self, ErrorDomain};
use crate::config::BridgeConfig;
use crate::dispatcher::CallbackDispatcher;
use crate::error::BridgeError;
use crate::handle::{Address, Framing, TransportHandle};
use crate::lifecycle::LifecycleCoordinator;
use crate::native::NativeEngine;
use crate::observability::{BridgeMetrics, LOG_TARGET};
use crate::registry::{HandleEntry, HandleRegistry};
use crate::runtime::{AttachmentManager, ManagedRuntime};
use crate::state::SocketState;
use crate::target::{CallbackTarget, SocketFactory};
use crate::translate::ManagedError;

pub(crate) struct Shared {
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) registry: Arc<HandleRegistry>,
    pub(crate) coordinator: LifecycleCoordinator,
    pub(crate) attachment: AttachmentManager,
    pub(crate) metrics: Arc<BridgeMetrics>,
    pub(crate) config: BridgeConfig,
    factory: RwLock<Option<Arc<dyn SocketFactory>>>,
}

impl Shared {
    fn register(
        &self,
        handle: TransportHandle,
        target: Arc<dyn CallbackTarget>,
    ) -> Result<Arc<HandleEntry>, BridgeError> {
        let registration = self
            .registry
            .register(handle, target)
            .map_err(|err| self.coordinator.report(err))?;
        registration
            .entry
            .lifecycle()
            .adopt_pin(registration.pin)
            .map_err(|err| self.coordinator.report(err))?;
        self.metrics.record_registered();
        tracing::debug!(target: LOG_TARGET, %handle, "transport registered");
        Ok(registration.entry)
    }

    /// 查找句柄；未知句柄记录 `warn` 与丢弃计数。
    pub(crate) fn lookup(
        &self,
        handle: TransportHandle,
        event: &'static str,
    ) -> Result<Arc<HandleEntry>, BridgeError> {
        self.registry
            .lookup(handle)
            .ok_or_else(|| self.drop_unknown(handle, event))
    }

    /// 原生侧主动发起的连接：通过工厂创建回调目标并注册。
    pub(crate) fn adopt_from_factory(
        &self,
        handle: TransportHandle,
        address: &Address,
        options: &Bytes,
    ) -> Result<Arc<HandleEntry>, BridgeError> {
        let factory = self.factory.read().clone();
        let Some(factory) = factory else {
            return Err(self.drop_unknown(handle, "on_open"));
        };
        let target = factory
            .create_target(handle, address, options)
            .map_err(|err| {
                self.metrics.record_dropped();
                tracing::warn!(target: LOG_TARGET, %handle, error = %err, "socket factory declined inbound transport");
                BridgeError::from(err)
            })?;
        self.register(handle, target)
    }

    fn drop_unknown(&self, handle: TransportHandle, event: &'static str) -> BridgeError {
        self.metrics.record_dropped();
        tracing::warn!(target: LOG_TARGET, %handle, event, "event dropped: unknown transport handle");
        BridgeError::UnknownHandle { handle }
    }
}

/// 桥接层实例。
///
/// # 教案式说明
/// - **意图 (Why)**：替代进程级全局表，注册表与附着管理器都随实例注入；
/// - **契约 (What)**：[`TransportManager::new`] 校验配置；实例可廉价克隆，克隆共享同一份状态。
#[derive(Clone)]
pub struct TransportManager {
    shared: Arc<Shared>,
}

impl TransportManager {
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        runtime: Arc<dyn ManagedRuntime>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let metrics = Arc::new(BridgeMetrics::new());
        let registry = Arc::new(HandleRegistry::new());
        let shared = Shared {
            engine,
            coordinator: LifecycleCoordinator::new(Arc::clone(&registry), Arc::clone(&metrics)),
            attachment: AttachmentManager::new(runtime, Arc::clone(&metrics)),
            registry,
            metrics,
            config,
            factory: RwLock::new(None),
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// 安装入站连接工厂。
    pub fn with_socket_factory(self, factory: Arc<dyn SocketFactory>) -> Self {
        self.set_socket_factory(factory);
        self
    }

    pub fn set_socket_factory(&self, factory: Arc<dyn SocketFactory>) {
        *self.shared.factory.write() = Some(factory);
    }

    /// 为出站连接分配原生句柄并注册回调目标。
    ///
    /// `framing` 为 `None` 时使用 [`BridgeConfig::default_framing`]。
    pub fn open_outbound(
        &self,
        address: &Address,
        framing: Option<Framing>,
        target: Arc<dyn CallbackTarget>,
    ) -> Result<SocketPeer, BridgeError> {
        let framing = framing.unwrap_or(self.shared.config.default_framing);
        let handle = self
            .shared
            .engine
            .create_handle(address, framing)
            .map_err(|err| {
                tracing::warn!(target: LOG_TARGET, %address, error = %err, "native engine refused outbound transport");
                BridgeError::from(err)
            })?;
        tracing::debug!(target: LOG_TARGET, %handle, %address, framing = framing.as_raw(), "outbound transport created");
        let entry = match self.shared.register(handle, target) {
            Ok(entry) => entry,
            Err(err) => {
                // 原生句柄已分配，必须显式关闭，不能静默丢弃。
                tracing::warn!(target: LOG_TARGET, %handle, code = err.code(), "outbound transport not registered; closing native handle");
                let reason = ManagedError::new(
                    ErrorDomain::WebSocket,
                    codes::websocket::CANT_FULFILL,
                    format!("transport could not be registered: {err}"),
                );
                self.shared.engine.closed(handle, &reason);
                return Err(err);
            }
        };
        Ok(SocketPeer::new(entry, Arc::clone(&self.shared)))
    }

    /// 为原生侧已分配的句柄注册回调目标。
    pub fn adopt_inbound(
        &self,
        handle: TransportHandle,
        target: Arc<dyn CallbackTarget>,
    ) -> Result<SocketPeer, BridgeError> {
        let entry = self.shared.register(handle, target)?;
        Ok(SocketPeer::new(entry, Arc::clone(&self.shared)))
    }

    pub fn dispatcher(&self) -> CallbackDispatcher {
        CallbackDispatcher::new(Arc::clone(&self.shared))
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.shared.registry
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// 已注册句柄的托管侧句柄对象。
    pub fn peer(&self, handle: TransportHandle) -> Option<SocketPeer> {
        self.shared
            .registry
            .lookup(handle)
            .map(|entry| SocketPeer::new(entry, Arc::clone(&self.shared)))
    }
}

impl fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManager")
            .field("registered", &self.shared.registry.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// 托管侧持有的连接句柄，负责托管 → 原生方向的全部调用。
#[derive(Clone)]
pub struct SocketPeer {
    entry: Arc<HandleEntry>,
    shared: Arc<Shared>,
}

impl SocketPeer {
    pub(crate) fn new(entry: Arc<HandleEntry>, shared: Arc<Shared>) -> Self {
        Self { entry, shared }
    }

    pub fn handle(&self) -> TransportHandle {
        self.entry.handle()
    }

    pub fn state(&self) -> SocketState {
        self.entry.lifecycle().state()
    }

    pub fn pending_write_bytes(&self) -> usize {
        self.entry.lifecycle().pending_write_bytes()
    }

    pub fn unacknowledged_receive_bytes(&self) -> usize {
        self.entry.lifecycle().unacknowledged_receive_bytes()
    }

    /// 确认连接就绪；重复确认不会再次转发给原生侧。
    pub fn opened(&self) -> Result<(), BridgeError> {
        if self.checked(self.entry.lifecycle().mark_ready())? {
            self.shared.engine.opened(self.handle());
        }
        Ok(())
    }

    pub fn got_http_response(&self, status: i32, headers: &[u8]) -> Result<(), BridgeError> {
        self.checked(self.entry.lifecycle().check_handshake())?;
        self.shared
            .engine
            .got_http_response(self.handle(), status, headers);
        Ok(())
    }

    /// 写出字节；未确认字节超过 `max_pending_write_bytes` 时返回
    /// [`BridgeError::WriteBackpressure`]，调用方应等待 `on_write_completed` 后重试。
    pub fn write(&self, data: Bytes) -> Result<(), BridgeError> {
        let limit = self.shared.config.max_pending_write_bytes;
        self.checked(self.entry.lifecycle().record_write(data.len(), limit))?;
        self.shared.engine.write(self.handle(), data);
        Ok(())
    }

    /// 归还 `byte_count` 字节的读取额度。
    pub fn completed_receive(&self, byte_count: usize) -> Result<(), BridgeError> {
        let freed = self.checked(self.entry.lifecycle().acknowledge_receive(byte_count))?;
        drop(freed);
        self.shared
            .engine
            .completed_receive(self.handle(), byte_count);
        Ok(())
    }

    pub fn close_requested(&self, status: i32, message: &str) -> Result<(), BridgeError> {
        self.checked(self.entry.lifecycle().request_close())?;
        self.shared
            .engine
            .close_requested(self.handle(), status, message);
        Ok(())
    }

    /// 完成关闭。只有首次调用会转发给原生侧；`on_closed` 已投递后的调用被忽略。
    pub fn closed(&self, error: &ManagedError) -> Result<(), BridgeError> {
        let handle = self.handle();
        if self.entry.lifecycle().mark_managed_closed() {
            self.shared.engine.closed(handle, error);
        } else {
            tracing::debug!(target: LOG_TARGET, %handle, "repeated close ignored");
        }
        Ok(())
    }

    /// 为托管侧异步操作增加一份引用，返回新的引用计数。
    pub fn retain(&self) -> Result<usize, BridgeError> {
        self.shared.coordinator.retain(&self.entry)
    }

    pub fn release(&self) -> Result<(), BridgeError> {
        self.shared.coordinator.release(&self.entry)
    }

    fn checked<T>(&self, outcome: Result<T, BridgeError>) -> Result<T, BridgeError> {
        outcome.map_err(|err| self.shared.coordinator.report(err))
    }
}

impl fmt::Debug for SocketPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketPeer")
            .field("handle", &self.entry.handle())
            .field("state", &self.state())
            .finish()
    }
}

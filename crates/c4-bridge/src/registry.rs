//! # HandleRegistry：原生句柄 ↔ 托管回调目标的映射表
//!
//! ## 核心意图（Why）
//! - 原生引擎只会带着不透明地址回调，桥接层需要据此找回负责该连接的托管对象；
//! - 注册表以 `DashMap` 分片存储，`lookup` 与 `register`/`unregister` 可以在不同原生线程上并发调用。
//!
//! ## 行为契约（What）
//! - `register`：句柄已存在时返回 [`BridgeError::DuplicateHandle`]；成功时返回 [`Registration`]，
//!   其中的 [`PinToken`] 是回调目标唯一的强引用持有凭证；
//! - 注册表条目只保留对目标的 `Weak` 引用。`PinToken` 被丢弃后，`lookup_target` 不再能取回目标，
//!   因此拆除之后回调目标不可能再被访问；
//! - 注册表是可注入的实例，由 [`TransportManager`](crate::manager::TransportManager) 持有，
//!   不存在进程级单例。
//!
//! ## 风险提示（Trade-offs）
//! - `DashMap` 的分片锁只在单次操作内持有，本模块从不把 guard 泄露给调用方。

use core::fmt;
use std::sync::{Arc, Weak};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::error::BridgeError;
use crate::handle::TransportHandle;
use crate::lifecycle::HandleLifecycle;
use crate::target::CallbackTarget;

/// 回调目标的“全局引用”凭证。
///
/// 由生命周期协调器持有，拆除时丢弃；凭证存活期间目标不会被回收。
pub struct PinToken {
    handle: TransportHandle,
    target: Arc<dyn CallbackTarget>,
}

impl PinToken {
    pub fn handle(&self) -> TransportHandle {
        self.handle
    }

    pub(crate) fn target(&self) -> &Arc<dyn CallbackTarget> {
        &self.target
    }
}

impl fmt::Debug for PinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinToken")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// 一个已注册句柄的共享记录。
pub struct HandleEntry {
    handle: TransportHandle,
    target: Weak<dyn CallbackTarget>,
    lifecycle: HandleLifecycle,
}

impl HandleEntry {
    pub fn handle(&self) -> TransportHandle {
        self.handle
    }

    /// 取回回调目标；拆除后返回 `None`。
    pub fn target(&self) -> Option<Arc<dyn CallbackTarget>> {
        self.target.upgrade()
    }

    pub fn lifecycle(&self) -> &HandleLifecycle {
        &self.lifecycle
    }
}

impl fmt::Debug for HandleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleEntry")
            .field("handle", &self.handle)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// `register` 的结果：注册表条目与目标的强引用凭证。
#[derive(Debug)]
pub struct Registration {
    pub entry: Arc<HandleEntry>,
    pub pin: PinToken,
}

/// 句柄注册表。
#[derive(Debug, Default)]
pub struct HandleRegistry {
    entries: DashMap<TransportHandle, Arc<HandleEntry>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册句柄并为目标签发 [`PinToken`]。
    ///
    /// # 教案式注释
    /// - **前置条件**：句柄尚未注册；原生句柄分配器正确时该条件恒成立；
    /// - **后置条件**：成功时注册表出现新条目，其生命周期处于 `Created`、引用计数为 1。
    pub fn register(
        &self,
        handle: TransportHandle,
        target: Arc<dyn CallbackTarget>,
    ) -> Result<Registration, BridgeError> {
        match self.entries.entry(handle) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateHandle { handle }),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(HandleEntry {
                    handle,
                    target: Arc::downgrade(&target),
                    lifecycle: HandleLifecycle::new(handle),
                });
                vacant.insert(Arc::clone(&entry));
                Ok(Registration {
                    entry,
                    pin: PinToken { handle, target },
                })
            }
        }
    }

    /// 按句柄查找注册记录，不阻塞。
    pub fn lookup(&self, handle: TransportHandle) -> Option<Arc<HandleEntry>> {
        self.entries.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    /// 按句柄查找仍被钉住的回调目标。
    pub fn lookup_target(&self, handle: TransportHandle) -> Option<Arc<dyn CallbackTarget>> {
        self.lookup(handle).and_then(|entry| entry.target())
    }

    /// 移除句柄；返回条目是否存在。
    pub fn unregister(&self, handle: TransportHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: TransportHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Address;
    use crate::manager::SocketPeer;
    use crate::translate::ManagedError;
    use bytes::Bytes;

    struct Inert;

    impl CallbackTarget for Inert {
        fn on_open(&self, _: &SocketPeer, _: &Address, _: &Bytes) {}
        fn on_write_completed(&self, _: &SocketPeer, _: usize) {}
        fn on_received(&self, _: &SocketPeer, _: Bytes) {}
        fn on_close_requested(&self, _: &SocketPeer, _: i32, _: &str) {}
        fn on_closed(&self, _: &SocketPeer, _: &ManagedError) {}
    }

    fn handle(raw: u64) -> TransportHandle {
        TransportHandle::from_raw(raw).expect("测试句柄非零")
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = HandleRegistry::new();
        let first = registry
            .register(handle(1), Arc::new(Inert))
            .expect("首次注册成功");
        let err = registry
            .register(handle(1), Arc::new(Inert))
            .expect_err("重复注册必须失败");
        assert_eq!(err, BridgeError::DuplicateHandle { handle: handle(1) });
        assert_eq!(registry.len(), 1);
        drop(first);
    }

    #[test]
    fn dropping_pin_makes_target_unreachable() {
        let registry = HandleRegistry::new();
        let Registration { entry, pin } = registry
            .register(handle(2), Arc::new(Inert))
            .expect("注册成功");
        assert!(registry.lookup_target(handle(2)).is_some());
        drop(pin);
        assert!(entry.target().is_none(), "凭证释放后目标必须不可达");
        assert!(registry.lookup_target(handle(2)).is_none());
        assert!(registry.contains(handle(2)));
        assert!(registry.unregister(handle(2)));
        assert!(!registry.unregister(handle(2)));
        assert!(registry.is_empty());
    }
}

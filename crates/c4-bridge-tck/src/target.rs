use bytes::Bytes;
use c4_bridge::{
    Address, CallbackTarget, ManagedError, SocketEvent, SocketFactory, SocketPeer,
    TransportHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// 记录型回调目标。
///
/// # 教案式说明
/// - **意图 (Why)**：断言事件顺序与“关闭后不再投递”需要一份完整的事件日志；
/// - **逻辑 (How)**：每个回调把对应的 [`SocketEvent`] 追加到日志；若事件违反
///   `on_open → … → on_closed` 的顺序，额外记录一条违规描述，由测试统一断言为空；
/// - **可选行为**：`auto_open` 在 `on_open` 内立即调用 `peer.opened()`；
///   `auto_acknowledge` 在 `on_received` 内立即归还读取额度。
#[derive(Debug, Default)]
pub struct RecordingTarget {
    events: Mutex<Vec<SocketEvent>>,
    violations: Mutex<Vec<String>>,
    peer: Mutex<Option<SocketPeer>>,
    auto_open: bool,
    auto_acknowledge: bool,
}

impl RecordingTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 自动确认打开并自动归还读取额度的目标。
    pub fn cooperative() -> Arc<Self> {
        Arc::new(Self {
            auto_open: true,
            auto_acknowledge: true,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<SocketEvent> {
        self.events.lock().clone()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(SocketEvent::name).collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// 最近一次回调携带的对端句柄。
    pub fn peer(&self) -> Option<SocketPeer> {
        self.peer.lock().clone()
    }

    pub fn received(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SocketEvent::Received { data } => Some(data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn closed_error(&self) -> Option<ManagedError> {
        self.events.lock().iter().find_map(|event| match event {
            SocketEvent::Closed { error } => Some(error.clone()),
            _ => None,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed_error().is_some()
    }

    fn record(&self, peer: &SocketPeer, event: SocketEvent) {
        let mut events = self.events.lock();
        let opened = events.iter().any(|e| matches!(e, SocketEvent::Open { .. }));
        let closed = events.iter().any(|e| matches!(e, SocketEvent::Closed { .. }));
        let violation = match &event {
            _ if closed => Some(format!("{} delivered after on_closed", event.name())),
            SocketEvent::Open { .. } if opened => Some("on_open delivered twice".to_owned()),
            SocketEvent::Open { .. } => None,
            SocketEvent::Closed { .. } => None,
            _ if !opened => Some(format!("{} delivered before on_open", event.name())),
            _ => None,
        };
        events.push(event);
        drop(events);
        if let Some(violation) = violation {
            self.violations.lock().push(violation);
        }
        *self.peer.lock() = Some(peer.clone());
    }
}

impl CallbackTarget for RecordingTarget {
    fn on_open(&self, peer: &SocketPeer, address: &Address, options: &Bytes) {
        self.record(
            peer,
            SocketEvent::Open {
                address: address.clone(),
                options: options.clone(),
            },
        );
        if self.auto_open {
            let _ = peer.opened();
        }
    }

    fn on_write_completed(&self, peer: &SocketPeer, byte_count: usize) {
        self.record(peer, SocketEvent::WriteCompleted { byte_count });
    }

    fn on_received(&self, peer: &SocketPeer, data: Bytes) {
        let len = data.len();
        self.record(peer, SocketEvent::Received { data });
        if self.auto_acknowledge {
            let _ = peer.completed_receive(len);
        }
    }

    fn on_close_requested(&self, peer: &SocketPeer, status: i32, message: &str) {
        self.record(
            peer,
            SocketEvent::CloseRequested {
                status,
                message: message.to_owned(),
            },
        );
    }

    fn on_closed(&self, peer: &SocketPeer, error: &ManagedError) {
        self.record(
            peer,
            SocketEvent::Closed {
                error: error.clone(),
            },
        );
        // 释放对端句柄，使目标不再经由它间接持有桥接实例。
        self.peer.lock().take();
    }
}

/// 为原生侧主动接入的连接创建 [`RecordingTarget`] 的工厂。
#[derive(Debug, Default)]
pub struct RecordingFactory {
    created: Mutex<Vec<(TransportHandle, Arc<RecordingTarget>)>>,
    refuse: Mutex<Option<ManagedError>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_with(&self, error: ManagedError) {
        *self.refuse.lock() = Some(error);
    }

    pub fn created(&self) -> Vec<(TransportHandle, Arc<RecordingTarget>)> {
        self.created.lock().clone()
    }

    pub fn target_for(&self, handle: TransportHandle) -> Option<Arc<RecordingTarget>> {
        self.created
            .lock()
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, target)| Arc::clone(target))
    }
}

impl SocketFactory for RecordingFactory {
    fn create_target(
        &self,
        handle: TransportHandle,
        _address: &Address,
        _options: &Bytes,
    ) -> Result<Arc<dyn CallbackTarget>, ManagedError> {
        if let Some(error) = self.refuse.lock().clone() {
            return Err(error);
        }
        let target = RecordingTarget::cooperative();
        self.created.lock().push((handle, Arc::clone(&target)));
        Ok(target)
    }
}

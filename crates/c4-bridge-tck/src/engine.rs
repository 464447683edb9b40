use bytes::Bytes;
use c4_bridge::{
    Address, CallbackDispatcher, Framing, ManagedError, NativeEngine, TransportHandle,
    WeakDispatcher,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 托管侧发往原生引擎的一次调用。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineCall {
    Created { handle: TransportHandle, address: Address, framing: Framing },
    Opened { handle: TransportHandle },
    HttpResponse { handle: TransportHandle, status: i32, headers: Vec<u8> },
    Write { handle: TransportHandle, data: Bytes },
    CompletedReceive { handle: TransportHandle, byte_count: usize },
    CloseRequested { handle: TransportHandle, status: i32, message: String },
    Closed { handle: TransportHandle, error: ManagedError },
}

impl EngineCall {
    pub fn handle(&self) -> TransportHandle {
        match self {
            EngineCall::Created { handle, .. }
            | EngineCall::Opened { handle }
            | EngineCall::HttpResponse { handle, .. }
            | EngineCall::Write { handle, .. }
            | EngineCall::CompletedReceive { handle, .. }
            | EngineCall::CloseRequested { handle, .. }
            | EngineCall::Closed { handle, .. } => *handle,
        }
    }
}

/// 模拟原生引擎。
///
/// # 教案式说明
/// - **意图 (Why)**：契约测试需要观察托管侧发出的每一次原生调用，并能像真实引擎一样同步回调调度器；
/// - **逻辑 (How)**：句柄从 `0x1000` 起按 `0x10` 步进分配，模仿堆地址；调用按顺序记录在互斥锁保护的列表中；
///   开启 `echo_closed` 后，托管侧的 `closed()` 会在同一调用栈内触发 `on_closed`；
/// - **契约 (What)**：回调调度器前已释放内部锁；调度器以 [`WeakDispatcher`] 持有，避免与桥接实例形成引用环。
#[derive(Debug)]
pub struct MockEngine {
    next_handle: AtomicU64,
    calls: Mutex<Vec<EngineCall>>,
    dispatcher: Mutex<Option<WeakDispatcher>>,
    echo_closed: AtomicBool,
    refuse_next: Mutex<Option<ManagedError>>,
    reuse_next: Mutex<Option<TransportHandle>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(0x1000),
            calls: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
            echo_closed: AtomicBool::new(false),
            refuse_next: Mutex::new(None),
            reuse_next: Mutex::new(None),
        }
    }

    /// 分配一个新句柄而不经过 `create_handle`，模拟原生侧主动接入的连接。
    pub fn allocate_handle(&self) -> TransportHandle {
        let raw = self.next_handle.fetch_add(0x10, Ordering::Relaxed);
        match TransportHandle::from_raw(raw) {
            Some(handle) => handle,
            None => unreachable!("句柄分配器从 0x1000 起步，永不为零"),
        }
    }

    pub fn attach_dispatcher(&self, dispatcher: &CallbackDispatcher) {
        *self.dispatcher.lock() = Some(dispatcher.downgrade());
    }

    /// 托管侧 `closed()` 是否同步回送 `on_closed`。
    pub fn set_echo_closed(&self, enabled: bool) {
        self.echo_closed.store(enabled, Ordering::SeqCst);
    }

    /// 下一次 `create_handle` 返回给定错误。
    pub fn refuse_next_create(&self, error: ManagedError) {
        *self.refuse_next.lock() = Some(error);
    }

    /// 下一次 `create_handle` 返回给定的已有句柄，模拟原生侧地址复用。
    pub fn reuse_next_handle(&self, handle: TransportHandle) {
        *self.reuse_next.lock() = Some(handle);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, handle: TransportHandle) -> Vec<EngineCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.handle() == handle)
            .cloned()
            .collect()
    }

    /// 某句柄累计写出的字节。
    pub fn written(&self, handle: TransportHandle) -> Vec<u8> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Write { handle: h, data } if *h == handle => Some(data.clone()),
                _ => None,
            })
            .flat_map(|data| data.to_vec())
            .collect()
    }

    pub fn closed_count(&self, handle: TransportHandle) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, EngineCall::Closed { handle: h, .. } if *h == handle))
            .count()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn dispatcher(&self) -> Option<CallbackDispatcher> {
        let weak = self.dispatcher.lock().clone();
        weak.and_then(|weak| weak.upgrade())
    }
}

impl NativeEngine for MockEngine {
    fn create_handle(
        &self,
        address: &Address,
        framing: Framing,
    ) -> Result<TransportHandle, ManagedError> {
        if let Some(error) = self.refuse_next.lock().take() {
            return Err(error);
        }
        let reused = self.reuse_next.lock().take();
        let handle = reused.unwrap_or_else(|| self.allocate_handle());
        self.record(EngineCall::Created {
            handle,
            address: address.clone(),
            framing,
        });
        Ok(handle)
    }

    fn opened(&self, handle: TransportHandle) {
        self.record(EngineCall::Opened { handle });
    }

    fn got_http_response(&self, handle: TransportHandle, status: i32, headers: &[u8]) {
        self.record(EngineCall::HttpResponse {
            handle,
            status,
            headers: headers.to_vec(),
        });
    }

    fn write(&self, handle: TransportHandle, data: Bytes) {
        self.record(EngineCall::Write { handle, data });
    }

    fn completed_receive(&self, handle: TransportHandle, byte_count: usize) {
        self.record(EngineCall::CompletedReceive { handle, byte_count });
    }

    fn close_requested(&self, handle: TransportHandle, status: i32, message: &str) {
        self.record(EngineCall::CloseRequested {
            handle,
            status,
            message: message.to_owned(),
        });
    }

    fn closed(&self, handle: TransportHandle, error: &ManagedError) {
        self.record(EngineCall::Closed {
            handle,
            error: error.clone(),
        });
        if !self.echo_closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(dispatcher) = self.dispatcher() {
            // 竞争中落败的 on_closed 会被调度器拒绝。
            let _ = dispatcher.on_closed(
                handle,
                error.domain().as_raw(),
                error.code(),
                error.message().as_bytes(),
            );
        }
    }
}

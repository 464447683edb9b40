//! 原生引擎接缝：托管侧 → 原生句柄的调用集合。
//!
//! # 教案式说明
//! - **意图 (Why)**：真实部署中这些方法落到原生库的 `extern "C"` 入口；抽象为 trait 后，
//!   桥接层可以在测试中换成模拟引擎，也可以同时挂接多个独立引擎实例；
//! - **契约 (What)**：
//!   - 实现必须线程安全，任意线程都可能调用；
//!   - 实现可以在方法内部同步回调 [`CallbackDispatcher`](crate::dispatcher::CallbackDispatcher)，
//!     桥接层保证调用这些方法时不持有任何内部锁；
//!   - 除 [`NativeEngine::create_handle`] 外，原生入口没有返回值，失败经由后续的 `on_closed` 报告。

use bytes::Bytes;

use crate::handle::{Address, Framing, TransportHandle};
use crate::translate::ManagedError;

pub trait NativeEngine: Send + Sync + 'static {
    /// 为出站连接分配原生句柄。
    fn create_handle(
        &self,
        address: &Address,
        framing: Framing,
    ) -> Result<TransportHandle, ManagedError>;

    /// 托管侧已就绪，连接进入 `Open`。
    fn opened(&self, handle: TransportHandle);

    /// 托管侧收到 HTTP 握手响应；`headers` 为不透明编码的响应头。
    fn got_http_response(&self, handle: TransportHandle, status: i32, headers: &[u8]);

    /// 出站字节；完成后原生侧调用 `on_write_completed`。
    fn write(&self, handle: TransportHandle, data: Bytes);

    /// 托管侧已消费 `byte_count` 字节入站数据，原生侧可恢复读取。
    fn completed_receive(&self, handle: TransportHandle, byte_count: usize);

    /// 托管侧请求关闭。
    fn close_requested(&self, handle: TransportHandle, status: i32, message: &str);

    /// 托管侧完成关闭，携带最终错误记录。
    fn closed(&self, handle: TransportHandle, error: &ManagedError);
}

//! 托管侧回调目标与五类传输事件。
//!
//! # 教案式说明
//! - **意图 (Why)**：原生侧只认识五个回调函数指针；这里把它们收敛为封闭的 [`SocketEvent`] 枚举，
//!   由调度器唯一负责把事件映射到 [`CallbackTarget`] 的具体方法，避免事件类型在各处散落匹配；
//! - **契约 (What)**：同一句柄的事件顺序为 `on_open → {on_write_completed, on_received,
//!   on_close_requested}* → on_closed`；`on_closed` 之后不再有任何回调；
//! - **风险 (Trade-offs)**：回调在原生 I/O 线程上同步执行，实现方应尽快返回，耗时工作请转交自有线程池。

use std::sync::Arc;

use bytes::Bytes;

use crate::handle::{Address, TransportHandle};
use crate::manager::SocketPeer;
use crate::translate::ManagedError;

/// 托管侧实现的五事件回调接口。
///
/// 每个回调都拿到 [`SocketPeer`]，托管侧可以立即或稍后通过它回调原生句柄
/// （确认打开、写出数据、确认接收、请求关闭、完成关闭）。
pub trait CallbackTarget: Send + Sync + 'static {
    /// 原生引擎请求建立连接；每个句柄恰好一次，且先于其他事件。
    fn on_open(&self, peer: &SocketPeer, address: &Address, options: &Bytes);

    /// 先前通过 [`SocketPeer::write`] 排队的 `byte_count` 字节已经刷出。
    fn on_write_completed(&self, peer: &SocketPeer, byte_count: usize);

    /// 入站字节；托管侧处理完后须调用 [`SocketPeer::completed_receive`] 归还读取额度。
    fn on_received(&self, peer: &SocketPeer, data: Bytes);

    /// 对端或原生侧发起的关闭请求。
    fn on_close_requested(&self, peer: &SocketPeer, status: i32, message: &str);

    /// 终止事件；返回后桥接层释放原生引用。
    fn on_closed(&self, peer: &SocketPeer, error: &ManagedError);
}

/// 原生侧主动创建（入站）连接时，为未知句柄构造回调目标的工厂。
pub trait SocketFactory: Send + Sync + 'static {
    fn create_target(
        &self,
        handle: TransportHandle,
        address: &Address,
        options: &Bytes,
    ) -> Result<Arc<dyn CallbackTarget>, ManagedError>;
}

/// 一次待投递的传输事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SocketEvent {
    Open { address: Address, options: Bytes },
    WriteCompleted { byte_count: usize },
    Received { data: Bytes },
    CloseRequested { status: i32, message: String },
    Closed { error: ManagedError },
}

impl SocketEvent {
    /// 事件名，用作日志字段与附着操作标签。
    pub fn name(&self) -> &'static str {
        match self {
            SocketEvent::Open { .. } => "on_open",
            SocketEvent::WriteCompleted { .. } => "on_write_completed",
            SocketEvent::Received { .. } => "on_received",
            SocketEvent::CloseRequested { .. } => "on_close_requested",
            SocketEvent::Closed { .. } => "on_closed",
        }
    }

    pub(crate) fn deliver(self, target: &dyn CallbackTarget, peer: &SocketPeer) {
        match self {
            SocketEvent::Open { address, options } => target.on_open(peer, &address, &options),
            SocketEvent::WriteCompleted { byte_count } => {
                target.on_write_completed(peer, byte_count)
            }
            SocketEvent::Received { data } => target.on_received(peer, data),
            SocketEvent::CloseRequested { status, message } => {
                target.on_close_requested(peer, status, &message)
            }
            SocketEvent::Closed { error } => target.on_closed(peer, &error),
        }
    }
}

//! # c4-bridge
//!
//! ## 定位与职责（Why）
//! - 在原生网络传输引擎与托管侧的连接对象之间搭建回调桥：原生句柄分配后注册一个托管回调目标，
//!   之后原生 I/O 线程上的 open/write-completed/received/close-requested/closed 事件
//!   经由本 crate 投递给该目标，托管侧再通过 [`SocketPeer`] 回调原生句柄；
//! - 桥接层保证：事件只投给仍存活的句柄；回调时持有有效的托管执行上下文；
//!   双方共享引用全部归还后恰好拆除一次；原生错误的域与错误码逐位保留。
//!
//! ## 架构嵌入（Where）
//! - `registry` 与 `lifecycle` 管理句柄与引用；`runtime` 负责线程附着；
//! - `dispatcher` 承载原生 → 托管入口，`manager` 承载托管 → 原生调用与实例装配；
//! - `translate`、`buffer`、`codes` 负责错误记录与字节所有权转换。
//!
//! ## Feature 策略（Trade-offs）
//! - `subscriber` 特性提供 [`observability::install_fmt_subscriber`]，供没有自有 tracing 管线的宿主使用。

pub mod buffer;
pub mod codes;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod manager;
pub mod native;
pub mod observability;
pub mod registry;
pub mod runtime;
pub mod state;
mod sync;
pub mod target;
pub mod translate;

pub use buffer::{NativeBuffer, Ownership};
pub use codes::ErrorDomain;
pub use config::BridgeConfig;
pub use dispatcher::{CallbackDispatcher, WeakDispatcher};
pub use error::{AttachFailure, BridgeError, ErrorKind};
pub use handle::{Address, Framing, TransportHandle};
pub use lifecycle::{HandleLifecycle, LifecycleCoordinator, Teardown};
pub use manager::{SocketPeer, TransportManager};
pub use native::NativeEngine;
pub use observability::{BridgeMetrics, LOG_TARGET, MetricsSnapshot};
pub use registry::{HandleEntry, HandleRegistry, PinToken, Registration};
pub use runtime::{
    AttachGuard, AttachmentManager, InProcessRuntime, ManagedRuntime, RuntimeContext, ThreadStatus,
};
pub use state::SocketState;
pub use target::{CallbackTarget, SocketEvent, SocketFactory};
pub use translate::{ManagedError, TRANSCODE_PLACEHOLDER, translate};

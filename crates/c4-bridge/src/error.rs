//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为桥接层对外暴露的错误语义提供集中定义：原生引擎错误原样透传，桥接自身的不变量破坏、
//!   运行时附着失败与文本转码失败分别归类，便于告警与排障精确定位。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，并通过 [`BridgeError::code`] 暴露 `<域>.<语义>` 稳定错误码；
//! - [`BridgeError::kind`] 给出分类学意义上的大类，调用方据此决定“丢弃事件”还是“终止该句柄”。

use thiserror::Error;

use crate::handle::TransportHandle;
use crate::state::SocketState;
use crate::translate::ManagedError;

/// 桥接层错误的大类。
///
/// - `NativeEngine`：原生引擎给出的 `(domain, code)`，逐位透传；
/// - `InvariantViolation`：重复释放、重复拆除、关闭后派发等编程错误，永不静默吞掉；
/// - `RuntimeAttachment`：无法获得托管执行上下文，事件被丢弃但句柄保持存活；
/// - `Transcoding`：消息文本无法转码，降级为占位文本，不阻断投递；
/// - `Usage`：托管侧在不允许的状态下调用，例如背压上限已满仍继续写入；
/// - `Config`：配置解析或校验失败。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    NativeEngine,
    InvariantViolation,
    RuntimeAttachment,
    Transcoding,
    Usage,
    Config,
}

/// 获取托管执行上下文失败的具体原因。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttachFailure {
    /// 线程附着调用本身失败，携带运行时返回的状态码。
    AttachFailed(i32),
    /// 查询当前线程环境时得到既非“已附着”也非“未附着”的状态。
    EnvironmentUnavailable(i32),
    /// 取得的上下文中存在尚未处理的托管异常，不能交给回调使用。
    PendingFault,
}

/// 桥接层统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：所有跨边界调用都返回 `Result<_, BridgeError>`，使原生 I/O 线程上的每条失败路径
///   都有可观测的落点，而不是像回调函数指针那样只能打印一行日志；
/// - **契约 (What)**：变体均为 `Send + Sync + 'static`，可跨线程传播；`NativeEngine` 变体内的
///   [`ManagedError`] 保留原生域与错误码；
/// - **风险 (Trade-offs)**：`InvariantViolation` 的 `detail` 使用 `String`，牺牲少量分配换取可读上下文。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BridgeError {
    /// 同一原生句柄被重复注册，通常意味着原生句柄分配器出错。
    #[error("transport handle {handle} is already registered")]
    DuplicateHandle { handle: TransportHandle },

    /// 句柄未注册或已完成拆除，事件被丢弃。
    #[error("no transport registered for {handle}")]
    UnknownHandle { handle: TransportHandle },

    /// 桥接层内部不变量遭到破坏。
    #[error("bridge invariant violated for {}: {detail}", handle_label(.handle))]
    InvariantViolation {
        handle: Option<TransportHandle>,
        detail: String,
    },

    /// 无法为当前线程提供托管执行上下文。
    #[error("runtime attachment failed during `{operation}`: {reason:?}")]
    RuntimeAttachment {
        operation: &'static str,
        reason: AttachFailure,
    },

    /// 原生消息字节无法无损转码为文本。
    #[error("message transcoding failed: {detail}")]
    Transcoding { detail: String },

    /// 原生引擎返回的错误记录。
    #[error("native engine error: {0}")]
    NativeEngine(ManagedError),

    /// 未确认的出站字节已达上限，调用方需等待 `on_write_completed`。
    #[error("write backpressure on {handle}: {pending} bytes pending, limit {limit}")]
    WriteBackpressure {
        handle: TransportHandle,
        pending: usize,
        limit: usize,
    },

    /// 托管侧在当前状态下不允许执行该操作。
    #[error("operation `{operation}` not permitted on {handle} in state {state:?}")]
    InvalidState {
        handle: TransportHandle,
        state: SocketState,
        operation: &'static str,
    },

    /// 配置解析或校验失败。
    #[error("invalid bridge configuration: {detail}")]
    Config { detail: String },
}

fn handle_label(handle: &Option<TransportHandle>) -> String {
    match handle {
        Some(handle) => handle.to_string(),
        None => "<no handle>".to_owned(),
    }
}

impl BridgeError {
    /// 构造与句柄关联的不变量错误。
    pub fn invariant(handle: TransportHandle, detail: impl Into<String>) -> Self {
        BridgeError::InvariantViolation {
            handle: Some(handle),
            detail: detail.into(),
        }
    }

    /// 所属大类。
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::DuplicateHandle { .. } | BridgeError::InvariantViolation { .. } => {
                ErrorKind::InvariantViolation
            }
            BridgeError::UnknownHandle { .. }
            | BridgeError::WriteBackpressure { .. }
            | BridgeError::InvalidState { .. } => ErrorKind::Usage,
            BridgeError::RuntimeAttachment { .. } => ErrorKind::RuntimeAttachment,
            BridgeError::Transcoding { .. } => ErrorKind::Transcoding,
            BridgeError::NativeEngine(_) => ErrorKind::NativeEngine,
            BridgeError::Config { .. } => ErrorKind::Config,
        }
    }

    /// 稳定错误码，遵循 `bridge.<区域>.<语义>` 命名。
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::DuplicateHandle { .. } => "bridge.registry.duplicate",
            BridgeError::UnknownHandle { .. } => "bridge.registry.unknown",
            BridgeError::InvariantViolation { .. } => "bridge.lifecycle.invariant",
            BridgeError::RuntimeAttachment { .. } => "bridge.runtime.attach",
            BridgeError::Transcoding { .. } => "bridge.translate.transcode",
            BridgeError::NativeEngine(_) => "bridge.native.error",
            BridgeError::WriteBackpressure { .. } => "bridge.flow.write_backpressure",
            BridgeError::InvalidState { .. } => "bridge.lifecycle.invalid_state",
            BridgeError::Config { .. } => "bridge.config.invalid",
        }
    }

    /// 是否属于不变量破坏。
    pub fn is_invariant_violation(&self) -> bool {
        self.kind() == ErrorKind::InvariantViolation
    }
}

impl From<ManagedError> for BridgeError {
    fn from(value: ManagedError) -> Self {
        BridgeError::NativeEngine(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::ErrorDomain;

    #[test]
    fn invariant_violation_names_the_handle() {
        let handle = TransportHandle::from_raw(0x10).expect("非零句柄");
        let err = BridgeError::invariant(handle, "release after dispose");
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert_eq!(err.code(), "bridge.lifecycle.invariant");
        assert_eq!(
            err.to_string(),
            "bridge invariant violated for @0x10: release after dispose"
        );

        let detached = BridgeError::InvariantViolation {
            handle: None,
            detail: "use after transfer".into(),
        };
        assert!(detached.to_string().contains("<no handle>"));
    }

    #[test]
    fn native_errors_keep_domain_and_code() {
        let err: BridgeError = ManagedError::new(ErrorDomain::Network, 19, "refused").into();
        assert_eq!(err.kind(), ErrorKind::NativeEngine);
        match err {
            BridgeError::NativeEngine(inner) => {
                assert_eq!(inner.domain(), ErrorDomain::Network);
                assert_eq!(inner.code(), 19);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}

//! # 托管运行时附着
//!
//! ## 核心意图（Why）
//! - 原生 I/O 线程可能从未进入过托管运行时，回调前必须先取得执行上下文，结束后归还；
//! - 线程原本已附着时不能替它分离，只有本次调用亲自附着的线程才在结束时分离。
//!
//! ## 契约（What）
//! - [`AttachmentManager::with_attached_context`] 是唯一入口：
//!   1. 查询线程状态：`Attached` 直接使用；`Detached` 尝试附着；`Unavailable` 视为失败；
//!   2. 附着成功后检查是否存在未处理的托管异常，存在则放弃本次回调；
//!   3. 执行 thunk，返回其结果；
//! - 分离由 [`AttachGuard`] 的 `Drop` 完成，正常返回、提前返回与 panic 展开都会经过；
//! - 分离失败只记录 `warn`，附着失败记录 `warn` 并返回 [`BridgeError::RuntimeAttachment`]。

use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

use crate::error::{AttachFailure, BridgeError};
use crate::observability::{BridgeMetrics, LOG_TARGET};

/// 当前线程在托管运行时中的状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadStatus {
    Attached,
    Detached,
    /// 运行时给出了无法识别的状态码。
    Unavailable(i32),
}

/// 托管运行时的线程附着原语。
///
/// 实现方负责把这些调用映射到具体运行时；失败以运行时自身的状态码表示。
pub trait ManagedRuntime: Send + Sync + 'static {
    fn thread_status(&self) -> ThreadStatus;

    fn attach_current_thread(&self) -> Result<(), i32>;

    fn detach_current_thread(&self) -> Result<(), i32>;

    /// 当前线程是否存在尚未处理的托管异常。
    fn has_pending_fault(&self) -> bool;
}

/// 纯 Rust 宿主使用的运行时：所有线程视为常驻附着。
#[derive(Clone, Copy, Debug, Default)]
pub struct InProcessRuntime;

impl ManagedRuntime for InProcessRuntime {
    fn thread_status(&self) -> ThreadStatus {
        ThreadStatus::Attached
    }

    fn attach_current_thread(&self) -> Result<(), i32> {
        Ok(())
    }

    fn detach_current_thread(&self) -> Result<(), i32> {
        Ok(())
    }

    fn has_pending_fault(&self) -> bool {
        false
    }
}

/// 已取得托管执行上下文的证明，仅在 thunk 内部有效，且不能跨线程传递。
pub struct RuntimeContext<'a> {
    operation: &'static str,
    attached_here: bool,
    _thread_bound: PhantomData<(&'a (), *const ())>,
}

impl RuntimeContext<'_> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// 本次调用是否亲自附着了当前线程。
    pub fn attached_here(&self) -> bool {
        self.attached_here
    }
}

impl fmt::Debug for RuntimeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("operation", &self.operation)
            .field("attached_here", &self.attached_here)
            .finish()
    }
}

/// 作用域附着守卫；仅当 `detach_on_drop` 为真时在析构中分离线程。
#[must_use = "守卫被丢弃时立即分离线程"]
pub struct AttachGuard<'a> {
    runtime: &'a dyn ManagedRuntime,
    operation: &'static str,
    detach_on_drop: bool,
}

impl AttachGuard<'_> {
    pub fn attached_here(&self) -> bool {
        self.detach_on_drop
    }
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        if !self.detach_on_drop {
            return;
        }
        if let Err(status) = self.runtime.detach_current_thread() {
            tracing::warn!(
                target: LOG_TARGET,
                operation = self.operation,
                status,
                "failed to detach thread from managed runtime"
            );
        }
    }
}

impl fmt::Debug for AttachGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachGuard")
            .field("operation", &self.operation)
            .field("detach_on_drop", &self.detach_on_drop)
            .finish()
    }
}

/// 为原生线程上的回调提供托管执行上下文。
pub struct AttachmentManager {
    runtime: Arc<dyn ManagedRuntime>,
    metrics: Arc<BridgeMetrics>,
}

impl AttachmentManager {
    pub fn new(runtime: Arc<dyn ManagedRuntime>, metrics: Arc<BridgeMetrics>) -> Self {
        Self { runtime, metrics }
    }

    /// 取得附着守卫，不检查托管异常。
    pub fn attach(&self, operation: &'static str) -> Result<AttachGuard<'_>, BridgeError> {
        let runtime = self.runtime.as_ref();
        let detach_on_drop = match runtime.thread_status() {
            ThreadStatus::Attached => false,
            ThreadStatus::Detached => {
                runtime
                    .attach_current_thread()
                    .map_err(|status| self.fail(operation, AttachFailure::AttachFailed(status)))?;
                true
            }
            ThreadStatus::Unavailable(status) => {
                return Err(self.fail(operation, AttachFailure::EnvironmentUnavailable(status)));
            }
        };
        Ok(AttachGuard {
            runtime,
            operation,
            detach_on_drop,
        })
    }

    /// 在托管执行上下文中运行 `thunk`。
    ///
    /// # 教案式注释
    /// - **前置条件**：无；任意原生线程都可以调用；
    /// - **后置条件**：返回时线程的附着状态与调用前一致；
    /// - **失败语义**：附着失败、环境不可用或存在未处理异常时不会执行 `thunk`。
    pub fn with_attached_context<R>(
        &self,
        operation: &'static str,
        thunk: impl FnOnce(&RuntimeContext<'_>) -> R,
    ) -> Result<R, BridgeError> {
        let guard = self.attach(operation)?;
        if self.runtime.has_pending_fault() {
            return Err(self.fail(operation, AttachFailure::PendingFault));
        }
        let context = RuntimeContext {
            operation,
            attached_here: guard.attached_here(),
            _thread_bound: PhantomData,
        };
        let output = thunk(&context);
        drop(guard);
        Ok(output)
    }

    fn fail(&self, operation: &'static str, reason: AttachFailure) -> BridgeError {
        self.metrics.record_attach_failure();
        if reason == AttachFailure::PendingFault {
            tracing::error!(
                target: LOG_TARGET,
                operation,
                "managed runtime has a pending fault; callback skipped"
            );
        } else {
            tracing::warn!(
                target: LOG_TARGET,
                operation,
                reason = ?reason,
                "managed runtime context unavailable"
            );
        }
        BridgeError::RuntimeAttachment { operation, reason }
    }
}

impl fmt::Debug for AttachmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[derive(Default)]
    struct Script {
        attached: bool,
        attach_status: Option<i32>,
        detach_status: Option<i32>,
        unavailable: Option<i32>,
        fault: bool,
        attaches: usize,
        detaches: usize,
    }

    #[derive(Default)]
    struct ScriptedRuntime(Mutex<Script>);

    impl ManagedRuntime for ScriptedRuntime {
        fn thread_status(&self) -> ThreadStatus {
            let script = self.0.lock();
            match (script.unavailable, script.attached) {
                (Some(status), _) => ThreadStatus::Unavailable(status),
                (None, true) => ThreadStatus::Attached,
                (None, false) => ThreadStatus::Detached,
            }
        }

        fn attach_current_thread(&self) -> Result<(), i32> {
            let mut script = self.0.lock();
            if let Some(status) = script.attach_status {
                return Err(status);
            }
            script.attaches += 1;
            script.attached = true;
            Ok(())
        }

        fn detach_current_thread(&self) -> Result<(), i32> {
            let mut script = self.0.lock();
            script.detaches += 1;
            script.attached = false;
            script.detach_status.map_or(Ok(()), Err)
        }

        fn has_pending_fault(&self) -> bool {
            self.0.lock().fault
        }
    }

    fn manager(runtime: &Arc<ScriptedRuntime>) -> (AttachmentManager, Arc<BridgeMetrics>) {
        let metrics = Arc::new(BridgeMetrics::new());
        let manager = AttachmentManager::new(
            Arc::clone(runtime) as Arc<dyn ManagedRuntime>,
            Arc::clone(&metrics),
        );
        (manager, metrics)
    }

    #[test]
    fn detached_thread_is_attached_then_detached() {
        let runtime = Arc::new(ScriptedRuntime::default());
        let (manager, _) = manager(&runtime);
        let attached_here = manager
            .with_attached_context("on_received", |ctx| ctx.attached_here())
            .expect("附着成功");
        assert!(attached_here);
        let script = runtime.0.lock();
        assert_eq!((script.attaches, script.detaches), (1, 1));
        assert!(!script.attached);
    }

    #[test]
    fn already_attached_thread_is_left_attached() {
        let runtime = Arc::new(ScriptedRuntime::default());
        runtime.0.lock().attached = true;
        let (manager, _) = manager(&runtime);
        manager
            .with_attached_context("on_open", |ctx| assert!(!ctx.attached_here()))
            .expect("直接使用现有上下文");
        let script = runtime.0.lock();
        assert_eq!((script.attaches, script.detaches), (0, 0));
        assert!(script.attached);
    }

    #[test]
    fn panic_inside_thunk_still_detaches() {
        let runtime = Arc::new(ScriptedRuntime::default());
        let (manager, _) = manager(&runtime);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = manager.with_attached_context("on_closed", |_| -> () { panic!("callback failed") });
        }));
        assert!(outcome.is_err());
        assert_eq!(runtime.0.lock().detaches, 1);
    }

    #[test]
    fn failures_skip_the_thunk() {
        let runtime = Arc::new(ScriptedRuntime::default());
        let (manager, metrics) = manager(&runtime);

        let mut ran = false;
        runtime.0.lock().attach_status = Some(-3);
        let err = manager
            .with_attached_context("on_open", |_| ran = true)
            .expect_err("附着失败");
        assert_eq!(
            err,
            BridgeError::RuntimeAttachment {
                operation: "on_open",
                reason: AttachFailure::AttachFailed(-3),
            }
        );

        {
            let mut script = runtime.0.lock();
            script.attach_status = None;
            script.fault = true;
        }
        let err = manager
            .with_attached_context("on_received", |_| ran = true)
            .expect_err("存在托管异常");
        assert!(!ran, "失败路径不得执行回调");
        assert!(matches!(
            err,
            BridgeError::RuntimeAttachment { reason: AttachFailure::PendingFault, .. }
        ));
        assert_eq!(runtime.0.lock().detaches, 1, "放弃回调时同样要分离");

        {
            let mut script = runtime.0.lock();
            script.fault = false;
            script.unavailable = Some(-2);
        }
        let err = manager
            .with_attached_context("on_closed", |_| ())
            .expect_err("环境不可用");
        assert!(matches!(
            err,
            BridgeError::RuntimeAttachment {
                reason: AttachFailure::EnvironmentUnavailable(-2),
                ..
            }
        ));
        assert_eq!(metrics.snapshot().attach_failures, 3);
    }

    #[test]
    fn detach_failure_does_not_fail_the_call() {
        let runtime = Arc::new(ScriptedRuntime::default());
        runtime.0.lock().detach_status = Some(-1);
        let (manager, _) = manager(&runtime);
        let value = manager
            .with_attached_context("on_write_completed", |_| 7)
            .expect("分离失败只记录日志");
        assert_eq!(value, 7);
    }
}

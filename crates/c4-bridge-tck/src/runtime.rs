use c4_bridge::{ManagedRuntime, ThreadStatus};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

/// 可注入故障的模拟托管运行时。
///
/// # 教案式说明
/// - **意图 (Why)**：附着/分离的配对关系只能在“线程起初未附着”的运行时中观察到，
///   因此按线程记录附着状态并统计调用次数；
/// - **故障注入 (How)**：
///   - [`SimulatedRuntime::fail_next_attach`]：下一次附着返回给定状态码；
///   - [`SimulatedRuntime::inject_fault`]：下一次检查时报告一个未处理的托管异常，检查后自动清除；
///   - [`SimulatedRuntime::fail_detach`]：分离调用返回错误，但线程仍被视为已分离；
///   - [`SimulatedRuntime::set_unavailable`]：线程状态查询返回无法识别的状态码。
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    attached: Mutex<HashSet<ThreadId>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    attach_failure: Mutex<Option<i32>>,
    pending_fault: AtomicBool,
    detach_fails: AtomicBool,
    unavailable: Mutex<Option<i32>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把调用线程标记为宿主自行附着的线程。
    pub fn attach_calling_thread(&self) {
        self.attached.lock().insert(thread::current().id());
    }

    pub fn is_calling_thread_attached(&self) -> bool {
        self.attached.lock().contains(&thread::current().id())
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn fail_next_attach(&self, status: i32) {
        *self.attach_failure.lock() = Some(status);
    }

    pub fn inject_fault(&self) {
        self.pending_fault.store(true, Ordering::SeqCst);
    }

    pub fn fail_detach(&self, enabled: bool) {
        self.detach_fails.store(enabled, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, status: Option<i32>) {
        *self.unavailable.lock() = status;
    }
}

impl ManagedRuntime for SimulatedRuntime {
    fn thread_status(&self) -> ThreadStatus {
        if let Some(status) = *self.unavailable.lock() {
            return ThreadStatus::Unavailable(status);
        }
        if self.is_calling_thread_attached() {
            ThreadStatus::Attached
        } else {
            ThreadStatus::Detached
        }
    }

    fn attach_current_thread(&self) -> Result<(), i32> {
        if let Some(status) = self.attach_failure.lock().take() {
            return Err(status);
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.attached.lock().insert(thread::current().id());
        Ok(())
    }

    fn detach_current_thread(&self) -> Result<(), i32> {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.attached.lock().remove(&thread::current().id());
        if self.detach_fails.load(Ordering::SeqCst) {
            return Err(-1);
        }
        Ok(())
    }

    fn has_pending_fault(&self) -> bool {
        self.pending_fault.swap(false, Ordering::SeqCst)
    }
}

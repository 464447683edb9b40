//! 句柄生命周期使用的互斥锁。
//!
//! 常规构建直接使用 `parking_lot::Mutex`；`--cfg loom` 下换成 Loom 的互斥锁，
//! 让模型检查穷举真实 [`HandleLifecycle`](crate::lifecycle::HandleLifecycle) 的加锁交错。

#[cfg(not(loom))]
pub(crate) use parking_lot::Mutex;

#[cfg(loom)]
pub(crate) use self::loom_shim::Mutex;

#[cfg(loom)]
mod loom_shim {
    use loom::sync::MutexGuard;

    /// 与 `parking_lot::Mutex` 同形：`lock` 直接返回守卫，中毒时取回内部值。
    pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(loom::sync::Mutex::new(value))
        }

        pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
            self.0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }
}

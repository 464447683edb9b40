use c4_bridge::BridgeError;
use std::fmt::{Debug, Write};
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 在附加“套件/用例”上下文的情况下重新抛出 panic。
///
/// # 教案式说明
/// - **意图 (Why)**：`case::run_suite` 捕获 panic 后，需要让失败信息指明来源；
/// - **契约 (What)**：调用前必须处于 `catch_unwind` 的错误分支中；函数不会正常返回。
pub fn panic_with_context(suite: &str, case: &str, payload: Box<dyn std::any::Any + Send>) -> ! {
    let mut message = String::new();
    let _ = write!(&mut message, "[c4-bridge-tck::{suite}::{case}] 测试失败：");

    if let Some(text) = payload.downcast_ref::<&str>() {
        let _ = write!(&mut message, "{text}");
    } else if let Some(text) = payload.downcast_ref::<String>() {
        let _ = write!(&mut message, "{text}");
    } else {
        let _ = write!(&mut message, "<未知 panic 类型>");
    }

    panic::resume_unwind(Box::new(message));
}

/// 断言结果为不变量破坏。
pub fn expect_invariant<T: Debug>(outcome: Result<T, BridgeError>, context: &str) {
    match outcome {
        Err(err) if err.is_invariant_violation() => {}
        other => panic!("{context}：预期不变量破坏，得到 {other:?}"),
    }
}

/// 构造一个计数型原生释放钩子。
pub fn counting_hook() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let counter = Arc::new(AtomicUsize::new(0));
    let hook = {
        let counter = Arc::clone(&counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    };
    (counter, hook)
}

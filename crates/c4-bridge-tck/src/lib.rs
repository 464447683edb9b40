//! c4-bridge 契约测试套件（TCK）入口。
//!
//! # 教案式综述（Why / How / What）
//! - **为什么存在**：桥接层的正确性取决于跨线程的时序与引用计数，单元测试只能覆盖局部；
//!   本 crate 提供一组可复用的测试替身与成套用例，任何 [`c4_bridge::NativeEngine`] 或
//!   [`c4_bridge::ManagedRuntime`] 的适配方都可以用它们对照同一准绳自测；
//! - **如何集成**：在 `tests` 目录下调用 `run_*` 入口函数，或直接使用 [`BridgeHarness`]
//!   与各测试替身编写额外场景；
//! - **测试替身**：
//!   - [`MockEngine`]：记录全部托管 → 原生调用，可选地同步回送 `on_closed`；
//!   - [`SimulatedRuntime`]：按线程记录附着状态，支持附着失败、未处理异常与分离失败注入；
//!   - [`RecordingTarget`] / [`RecordingFactory`]：记录事件序列并检测顺序违规。
//!
//! # 风险提示（Trade-offs）
//! - 套件使用真实线程与 `parking_lot` 互斥锁模拟原生 I/O 线程，竞争类用例的耗时与机器核数相关。

mod attachment;
mod engine;
mod harness;
mod lifecycle;
mod ordering;
mod runtime;
mod support;
mod target;
mod translation;

pub use engine::{EngineCall, MockEngine};
pub use harness::{BridgeHarness, sync_address};
pub use ordering::CLOSE_RACE_ITERATIONS;
pub use runtime::SimulatedRuntime;
pub use support::{counting_hook, expect_invariant, panic_with_context};
pub use target::{RecordingFactory, RecordingTarget};

use case::{TckSuite, run_suite};

const ALL_SUITES: [&TckSuite; 4] = [
    lifecycle::suite(),
    ordering::suite(),
    attachment::suite(),
    translation::suite(),
];

mod case {
    use super::support;
    use std::panic;

    /// 单个 TCK 用例：名称与零参数测试函数，失败时必须 panic。
    #[derive(Clone, Copy)]
    pub struct TckCase {
        pub name: &'static str,
        pub test: fn(),
    }

    /// 同一主题的一组用例。
    #[derive(Clone, Copy)]
    pub struct TckSuite {
        pub name: &'static str,
        pub cases: &'static [TckCase],
    }

    /// 依次执行套件内全部用例；失败时附加“套件/用例”上下文后重新 panic。
    pub fn run_suite(suite: &TckSuite) {
        assert!(!suite.cases.is_empty(), "TCK 套件不应为空");
        for case in suite.cases {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| (case.test)()));
            if let Err(payload) = outcome {
                support::panic_with_context(suite.name, case.name, payload);
            }
        }
    }
}

/// 返回所有套件的名称，顺序与 `run_all_suites` 的执行顺序一致。
pub fn suite_names() -> Vec<&'static str> {
    ALL_SUITES.iter().map(|suite| suite.name).collect()
}

/// 运行“生命周期”主题：注册、引用计数、拆除、背压与接收确认。
pub fn run_lifecycle_suite() {
    run_suite(lifecycle::suite());
}

/// 运行“顺序与并发”主题：关闭竞争与多句柄交错投递。
pub fn run_ordering_suite() {
    run_suite(ordering::suite());
}

/// 运行“运行时附着”主题：附着/分离配对与失败降级。
pub fn run_attachment_suite() {
    run_suite(attachment::suite());
}

/// 运行“错误翻译”主题：错误三元组透传、占位文本与关闭码重映射。
pub fn run_translation_suite() {
    run_suite(translation::suite());
}

pub fn run_all_suites() {
    for suite in ALL_SUITES {
        run_suite(suite);
    }
}

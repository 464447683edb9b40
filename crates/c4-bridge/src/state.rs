//! # 句柄状态机（SocketState）
//!
//! ## 状态机约束（What）
//! - 合法跃迁：`Created → Opening → Open → ClosePending → Closed → Disposed`；
//! - 除 `Closed`/`Disposed` 外任何状态都可以因错误直接进入 `ClosePending`，也可以因原生引擎
//!   直接投递 `onClosed` 进入 `Closed`；
//! - `Closed → Disposed` 是拆除边，只能由生命周期协调器在引用计数归零时触发，且是终态。

/// 单个传输句柄的生命周期状态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SocketState {
    /// 句柄已分配并注册，尚未收到 `onOpen`。
    Created,
    /// `onOpen` 已投递，等待托管侧确认就绪。
    Opening,
    /// 双向数据流可用。
    Open,
    /// 任一方已请求关闭，等待 `onClosed`。
    ClosePending,
    /// `onClosed` 已投递，不再接受任何事件。
    Closed,
    /// 拆除完成，句柄已从注册表移除。
    Disposed,
}

impl SocketState {
    /// 判断是否允许跃迁至 `target`。
    pub fn can_transition_to(self, target: SocketState) -> bool {
        use SocketState::*;
        matches!(
            (self, target),
            (Created, Opening)
                | (Created, ClosePending)
                | (Created, Closed)
                | (Opening, Open)
                | (Opening, ClosePending)
                | (Opening, Closed)
                | (Open, ClosePending)
                | (Open, Closed)
                | (ClosePending, ClosePending)
                | (ClosePending, Closed)
                | (Closed, Disposed)
        )
    }

    /// 是否已进入终态。
    pub fn is_terminal(self) -> bool {
        matches!(self, SocketState::Disposed)
    }

    /// `onClosed` 是否已经投递（含拆除后）。
    pub fn is_closed(self) -> bool {
        matches!(self, SocketState::Closed | SocketState::Disposed)
    }

    /// 是否允许投递 `onWriteCompleted`/`onReceived`/`onCloseRequested`。
    pub fn accepts_stream_events(self) -> bool {
        matches!(
            self,
            SocketState::Opening | SocketState::Open | SocketState::ClosePending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::SocketState::{self, *};
    use proptest::prelude::*;

    const ALL: [SocketState; 6] = [Created, Opening, Open, ClosePending, Closed, Disposed];

    #[test]
    fn disposed_is_terminal() {
        for target in ALL {
            assert!(!Disposed.can_transition_to(target));
        }
        assert!(Disposed.is_terminal());
    }

    #[test]
    fn only_closed_reaches_disposed() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Disposed), from == Closed);
        }
    }

    #[test]
    fn every_live_state_can_close_on_error() {
        for from in [Created, Opening, Open, ClosePending] {
            assert!(from.can_transition_to(ClosePending));
            assert!(from.can_transition_to(Closed));
        }
    }

    proptest! {
        /// 任意合法跃迁序列都不会从 `Closed` 回到可投递事件的状态。
        #[test]
        fn prop_closed_never_reopens(steps in proptest::collection::vec(0usize..6, 0..32)) {
            let mut state = Created;
            let mut seen_closed = false;
            for step in steps {
                let target = ALL[step];
                if state.can_transition_to(target) {
                    state = target;
                }
                seen_closed |= state.is_closed();
                if seen_closed {
                    prop_assert!(!state.accepts_stream_events());
                }
            }
        }
    }
}

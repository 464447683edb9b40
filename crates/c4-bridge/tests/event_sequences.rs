//! 随机事件序列下的生命周期性质。
//!
//! - 目标看到的事件序列永远以 `on_open` 开头、以唯一的 `on_closed` 结束；
//! - 托管侧的 retain/release 随机穿插，最终全部归还后句柄恰好拆除一次；
//! - `on_closed` 之后补投的任何事件都不会到达目标。

use bytes::Bytes;
use c4_bridge::{NativeBuffer, SocketState};
use c4_bridge_tck::{BridgeHarness, RecordingTarget, sync_address};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Receive(u8),
    Write(u8),
    CloseRequested,
    ManagedClose,
    Retain,
    Release,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u8..32).prop_map(Step::Receive),
        (1u8..32).prop_map(Step::Write),
        Just(Step::CloseRequested),
        Just(Step::ManagedClose),
        Just(Step::Retain),
        Just(Step::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_random_sessions_dispose_once(steps in proptest::collection::vec(step(), 0..24)) {
        let harness = BridgeHarness::new();
        let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
        let handle = peer.handle();
        let mut retained = 0usize;
        let mut closing = false;

        for step in &steps {
            match step {
                Step::Receive(len) => {
                    let data = NativeBuffer::borrowed(vec![*len; usize::from(*len)]);
                    prop_assert!(harness.dispatcher.on_received(handle, data).is_ok());
                }
                Step::Write(len) => {
                    prop_assert!(peer.write(Bytes::from(vec![0u8; usize::from(*len)])).is_ok());
                    prop_assert!(harness
                        .dispatcher
                        .on_write_completed(handle, usize::from(*len))
                        .is_ok());
                }
                Step::CloseRequested => {
                    prop_assert!(harness.dispatcher.on_close_requested(handle, 1000, b"").is_ok());
                    closing = true;
                }
                Step::ManagedClose => {
                    prop_assert!(peer.closed(&c4_bridge::ManagedError::success()).is_ok());
                    closing = true;
                }
                Step::Retain => {
                    prop_assert!(peer.retain().is_ok());
                    retained += 1;
                }
                Step::Release if retained > 0 => {
                    prop_assert!(peer.release().is_ok());
                    retained -= 1;
                }
                Step::Release => {
                    prop_assert!(peer.release().is_err(), "无匹配 retain 的 release 必须拒绝");
                }
            }
            let expected = if closing { SocketState::ClosePending } else { SocketState::Open };
            prop_assert_eq!(peer.state(), expected);
        }

        prop_assert!(harness.dispatcher.on_closed(handle, 1, 0, b"").is_ok());
        prop_assert!(harness.dispatcher.on_received(handle, NativeBuffer::transferable(vec![1])).is_err());
        for _ in 0..retained {
            prop_assert_eq!(peer.state(), SocketState::Closed);
            prop_assert!(peer.release().is_ok());
        }

        prop_assert_eq!(peer.state(), SocketState::Disposed);
        prop_assert!(harness.manager.registry().is_empty());
        prop_assert_eq!(harness.manager.metrics().snapshot().disposed, 1);

        let names = target.event_names();
        prop_assert_eq!(names.first().copied(), Some("on_open"));
        prop_assert_eq!(names.last().copied(), Some("on_closed"));
        prop_assert_eq!(names.iter().filter(|name| **name == "on_closed").count(), 1);
        prop_assert!(target.violations().is_empty(), "{:?}", target.violations());
    }
}

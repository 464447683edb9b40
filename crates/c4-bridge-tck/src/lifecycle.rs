use crate::case::{TckCase, TckSuite};
use crate::engine::EngineCall;
use crate::harness::{BridgeHarness, sync_address};
use crate::support::{counting_hook, expect_invariant};
use crate::target::{RecordingFactory, RecordingTarget};
use bytes::Bytes;
use c4_bridge::{
    BridgeConfig, BridgeError, ErrorDomain, ErrorKind, ManagedError, NativeBuffer, SocketFactory,
    SocketState, codes,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;

const CASES: &[TckCase] = &[
    TckCase {
        name: "full_session_disposes_exactly_once",
        test: full_session_disposes_exactly_once,
    },
    TckCase {
        name: "late_retain_and_release_after_dispose_are_rejected",
        test: late_retain_and_release_after_dispose_are_rejected,
    },
    TckCase {
        name: "events_on_closed_handles_are_never_delivered",
        test: events_on_closed_handles_are_never_delivered,
    },
    TckCase {
        name: "unknown_handles_drop_events",
        test: unknown_handles_drop_events,
    },
    TckCase {
        name: "inbound_open_consults_socket_factory",
        test: inbound_open_consults_socket_factory,
    },
    TckCase {
        name: "write_backpressure_limits_pending_bytes",
        test: write_backpressure_limits_pending_bytes,
    },
    TckCase {
        name: "receive_acknowledgement_is_bounded",
        test: receive_acknowledgement_is_bounded,
    },
    TckCase {
        name: "managed_close_is_forwarded_once",
        test: managed_close_is_forwarded_once,
    },
    TckCase {
        name: "unregistered_outbound_handle_is_closed",
        test: unregistered_outbound_handle_is_closed,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "lifecycle",
    cases: CASES,
};

/// 返回“生命周期”主题的测试套件：注册、引用计数、拆除与流控。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 完整会话：打开 → 写出 → 接收 → 关闭请求 → 托管关闭 → `on_closed` → 拆除。
///
/// # 教案式说明
/// - **意图 (Why)**：这是桥接层最常见的一条路径，逐步检查状态与原生调用记录；
/// - **契约 (What)**：`on_closed` 返回后句柄不再出现在注册表中，`disposed` 计数恰好为 1。
fn full_session_disposes_exactly_once() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    let handle = peer.handle();
    assert_eq!(peer.state(), SocketState::Open, "协作型目标在 on_open 中确认就绪");

    peer.write(Bytes::from_static(b"hello")).expect("写出");
    assert_eq!(peer.pending_write_bytes(), 5);
    harness
        .dispatcher
        .on_write_completed(handle, 5)
        .expect("写确认");
    assert_eq!(peer.pending_write_bytes(), 0);

    harness
        .dispatcher
        .on_received(handle, NativeBuffer::transferable(b"world".to_vec()))
        .expect("入站");
    assert_eq!(target.received(), b"world");
    assert_eq!(peer.unacknowledged_receive_bytes(), 0, "协作型目标自动归还额度");

    harness
        .dispatcher
        .on_close_requested(handle, codes::websocket::NORMAL, b"bye")
        .expect("关闭请求");
    assert_eq!(peer.state(), SocketState::ClosePending);
    peer.closed(&ManagedError::from_close_code(codes::websocket::NORMAL, Some("bye")))
        .expect("托管关闭");

    harness
        .dispatcher
        .on_closed(handle, ErrorDomain::LiteCore.as_raw(), codes::LITECORE_SUCCESS, b"")
        .expect("on_closed");

    assert_eq!(peer.state(), SocketState::Disposed);
    assert!(!harness.manager.registry().contains(handle));
    assert!(harness.manager.peer(handle).is_none());
    let metrics = harness.manager.metrics().snapshot();
    assert_eq!(metrics.registered, 1);
    assert_eq!(metrics.disposed, 1);
    assert_eq!(metrics.invariant_violations, 0);

    assert_eq!(
        target.event_names(),
        [
            "on_open",
            "on_write_completed",
            "on_received",
            "on_close_requested",
            "on_closed"
        ]
    );
    assert!(target.violations().is_empty(), "{:?}", target.violations());
    assert!(target.closed_error().is_some_and(|err| err.is_success()));

    let calls = harness.engine.calls_for(handle);
    assert_eq!(calls.len(), 5, "created/opened/write/completed_receive/closed");
    assert_eq!(harness.engine.written(handle), b"hello");
    assert_eq!(harness.engine.closed_count(handle), 1);
}

/// `on_closed` 之后的 retain 与拆除之后的 release 都是不变量破坏。
fn late_retain_and_release_after_dispose_are_rejected() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    assert_eq!(peer.retain().expect("retain"), 2);

    harness
        .dispatcher
        .on_closed(peer.handle(), ErrorDomain::WebSocket.as_raw(), 1001, b"going away")
        .expect("on_closed");
    assert_eq!(peer.state(), SocketState::Closed, "托管引用尚未归还");
    assert!(harness.manager.registry().contains(peer.handle()));

    expect_invariant(peer.retain(), "onClosed 之后 retain");
    peer.release().expect("归还最后一份引用");
    assert_eq!(peer.state(), SocketState::Disposed);
    expect_invariant(peer.release(), "拆除后 release");

    let metrics = harness.manager.metrics().snapshot();
    assert_eq!(metrics.disposed, 1, "拆除恰好一次");
    assert_eq!(metrics.invariant_violations, 2);
}

/// 关闭后的事件：仍被托管侧引用时报告不变量破坏，已拆除时按未知句柄丢弃。
fn events_on_closed_handles_are_never_delivered() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    let handle = peer.handle();
    peer.retain().expect("retain");
    harness
        .dispatcher
        .on_closed(handle, ErrorDomain::Network.as_raw(), codes::network::CONNECTION_RESET, b"reset")
        .expect("on_closed");

    expect_invariant(
        harness
            .dispatcher
            .on_received(handle, NativeBuffer::transferable(vec![1, 2, 3])),
        "onClosed 之后的 on_received",
    );
    expect_invariant(
        harness.dispatcher.on_closed(handle, 5, 18, b"again"),
        "重复 on_closed",
    );

    peer.release().expect("release");
    let err = harness
        .dispatcher
        .on_write_completed(handle, 1)
        .expect_err("已拆除句柄");
    assert_eq!(err, BridgeError::UnknownHandle { handle });

    assert_eq!(target.event_names(), ["on_open", "on_closed"]);
    assert!(target.violations().is_empty(), "{:?}", target.violations());
}

fn unknown_handles_drop_events() {
    let harness = BridgeHarness::new();
    let stray = harness.engine.allocate_handle();
    let (released, hook) = counting_hook();

    let err = harness
        .dispatcher
        .on_received(stray, NativeBuffer::borrowed(vec![0; 16]).with_release(hook))
        .expect_err("未知句柄");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(released.load(Ordering::SeqCst), 1, "被丢弃的原生缓冲仍要归还");

    let err = harness
        .dispatcher
        .on_open(stray, sync_address(), NativeBuffer::transferable(Vec::new()))
        .expect_err("未配置工厂时 on_open 同样丢弃");
    assert_eq!(err, BridgeError::UnknownHandle { handle: stray });
    assert_eq!(harness.manager.metrics().snapshot().dropped, 2);
}

/// 原生侧主动接入的连接经由 [`SocketFactory`] 创建回调目标。
fn inbound_open_consults_socket_factory() {
    let harness = BridgeHarness::new();
    let factory = RecordingFactory::new();
    harness
        .manager
        .set_socket_factory(Arc::clone(&factory) as Arc<dyn SocketFactory>);

    let inbound = harness.engine.allocate_handle();
    harness
        .dispatcher
        .on_open(inbound, sync_address(), NativeBuffer::transferable(b"opts".to_vec()))
        .expect("工厂接纳入站连接");
    let target = factory.target_for(inbound).expect("工厂已创建目标");
    assert_eq!(target.event_names(), ["on_open"]);
    let peer = harness.manager.peer(inbound).expect("入站句柄已注册");
    assert_eq!(peer.state(), SocketState::Open);

    factory.refuse_with(ManagedError::new(ErrorDomain::Network, codes::network::CONNECTION_REFUSED, "busy"));
    let refused = harness.engine.allocate_handle();
    let err = harness
        .dispatcher
        .on_open(refused, sync_address(), NativeBuffer::transferable(Vec::new()))
        .expect_err("工厂拒绝");
    assert_eq!(err.kind(), ErrorKind::NativeEngine);
    assert!(!harness.manager.registry().contains(refused));
}

fn write_backpressure_limits_pending_bytes() {
    let harness = BridgeHarness::with_config(BridgeConfig {
        max_pending_write_bytes: 8,
        ..BridgeConfig::default()
    });
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());

    peer.write(Bytes::from_static(b"abcdef")).expect("首次写出");
    match peer.write(Bytes::from_static(b"ghij")) {
        Err(BridgeError::WriteBackpressure { pending, limit, .. }) => {
            assert_eq!((pending, limit), (6, 8));
        }
        other => panic!("预期背压拒绝，得到 {other:?}"),
    }
    assert_eq!(harness.engine.written(peer.handle()), b"abcdef", "被拒绝的写入不得到达原生侧");

    harness
        .dispatcher
        .on_write_completed(peer.handle(), 6)
        .expect("写确认");
    peer.write(Bytes::from_static(b"ghij")).expect("额度恢复后写出");
    expect_invariant(
        harness.dispatcher.on_write_completed(peer.handle(), 10),
        "写确认超过未确认字节",
    );
}

fn receive_acknowledgement_is_bounded() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::new());
    let handle = peer.handle();
    let (released, hook) = counting_hook();

    harness
        .dispatcher
        .on_received(handle, NativeBuffer::borrowed(vec![7; 10]).with_release(hook))
        .expect("入站");
    assert_eq!(target.received(), vec![7; 10]);
    assert_eq!(peer.unacknowledged_receive_bytes(), 10);
    assert_eq!(released.load(Ordering::SeqCst), 0, "借用型缓冲保留到确认");

    expect_invariant(peer.completed_receive(11), "超额确认");
    peer.completed_receive(10).expect("确认");
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let (pending_release, pending_hook) = counting_hook();
    harness
        .dispatcher
        .on_received(handle, NativeBuffer::borrowed(vec![9; 4]).with_release(pending_hook))
        .expect("入站");
    harness
        .dispatcher
        .on_closed(handle, 6, 1006, b"")
        .expect("on_closed");
    assert_eq!(peer.state(), SocketState::Disposed);
    assert_eq!(pending_release.load(Ordering::SeqCst), 1, "拆除时释放未确认缓冲");
}

/// 托管侧 `closed()` 只转发首次调用；`on_closed` 之后的调用被忽略。
fn managed_close_is_forwarded_once() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    let handle = peer.handle();
    let error = ManagedError::from_close_code(codes::websocket::GOING_AWAY, Some("shutdown"));

    peer.closed(&error).expect("首次关闭");
    peer.closed(&error).expect("重复关闭被忽略");
    assert_eq!(harness.engine.closed_count(handle), 1);

    peer.retain().expect("retain");
    harness.engine.set_echo_closed(true);
    harness
        .dispatcher
        .on_closed(handle, 6, codes::websocket::GOING_AWAY, b"shutdown")
        .expect("on_closed");
    peer.closed(&error).expect("on_closed 之后的关闭被忽略");
    assert_eq!(harness.engine.closed_count(handle), 1);
    peer.release().expect("release");
    assert_eq!(harness.manager.metrics().snapshot().disposed, 1);
}

/// 注册失败的出站句柄必须显式关闭，既有句柄不受影响。
fn unregistered_outbound_handle_is_closed() {
    let harness = BridgeHarness::new();
    let address = sync_address();
    let (peer, target) = harness.open(&address, RecordingTarget::cooperative());
    let handle = peer.handle();

    harness.engine.reuse_next_handle(handle);
    let err = harness
        .manager
        .open_outbound(&address, None, RecordingTarget::new())
        .expect_err("句柄冲突");
    assert_eq!(err, BridgeError::DuplicateHandle { handle });
    assert_eq!(harness.engine.closed_count(handle), 1, "冲突句柄被关闭一次");
    match harness.engine.calls_for(handle).last() {
        Some(EngineCall::Closed { error, .. }) => {
            assert_eq!(error.domain(), ErrorDomain::WebSocket);
            assert_eq!(error.code(), codes::websocket::CANT_FULFILL);
        }
        other => panic!("expected a closed call, got {other:?}"),
    }

    assert_eq!(peer.state(), SocketState::Open, "已注册的句柄保持原状");
    assert_eq!(harness.manager.registry().len(), 1);
    assert!(target.violations().is_empty());
}

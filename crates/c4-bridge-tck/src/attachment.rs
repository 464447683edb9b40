use crate::case::{TckCase, TckSuite};
use crate::harness::{BridgeHarness, sync_address};
use crate::target::RecordingTarget;
use bytes::Bytes;
use c4_bridge::{
    Address, AttachFailure, BridgeError, CallbackTarget, ManagedError, NativeBuffer, SocketPeer,
    SocketState,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

const CASES: &[TckCase] = &[
    TckCase {
        name: "detached_native_thread_attaches_per_callback",
        test: detached_native_thread_attaches_per_callback,
    },
    TckCase {
        name: "host_attached_thread_stays_attached",
        test: host_attached_thread_stays_attached,
    },
    TckCase {
        name: "attach_failure_drops_event_and_keeps_handle",
        test: attach_failure_drops_event_and_keeps_handle,
    },
    TckCase {
        name: "pending_fault_skips_callback",
        test: pending_fault_skips_callback,
    },
    TckCase {
        name: "on_closed_attach_failure_allows_redelivery",
        test: on_closed_attach_failure_allows_redelivery,
    },
    TckCase {
        name: "detach_failure_still_delivers",
        test: detach_failure_still_delivers,
    },
    TckCase {
        name: "panicking_callback_still_detaches",
        test: panicking_callback_still_detaches,
    },
    TckCase {
        name: "panicking_on_closed_still_disposes",
        test: panicking_on_closed_still_disposes,
    },
    TckCase {
        name: "close_request_attach_failure_keeps_handshake_open",
        test: close_request_attach_failure_keeps_handshake_open,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "attachment",
    cases: CASES,
};

/// 返回“运行时附着”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

fn detached_native_thread_attaches_per_callback() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    assert_eq!(harness.runtime.attach_count(), 1);
    assert_eq!(harness.runtime.detach_count(), 1);

    harness
        .dispatcher
        .on_received(peer.handle(), NativeBuffer::transferable(vec![1; 3]))
        .expect("入站");
    assert_eq!(harness.runtime.attach_count(), 2);
    assert_eq!(harness.runtime.detach_count(), 2);
    assert!(!harness.runtime.is_calling_thread_attached(), "回调结束后线程恢复未附着");
}

fn host_attached_thread_stays_attached() {
    let harness = BridgeHarness::new();
    harness.runtime.attach_calling_thread();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness
        .dispatcher
        .on_close_requested(peer.handle(), 1000, b"")
        .expect("关闭请求");
    assert_eq!(harness.runtime.attach_count(), 0);
    assert_eq!(harness.runtime.detach_count(), 0);
    assert!(harness.runtime.is_calling_thread_attached());
}

/// 附着失败：事件被丢弃并计数，句柄状态与流控计数保持不变，下一次投递正常。
fn attach_failure_drops_event_and_keeps_handle() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::new());
    let handle = peer.handle();

    harness.runtime.fail_next_attach(-3);
    let err = harness
        .dispatcher
        .on_received(handle, NativeBuffer::transferable(vec![5; 8]))
        .expect_err("附着失败");
    assert_eq!(
        err,
        BridgeError::RuntimeAttachment {
            operation: "on_received",
            reason: AttachFailure::AttachFailed(-3),
        }
    );
    assert_eq!(target.event_names(), ["on_open"]);
    assert_eq!(peer.state(), SocketState::Opening);
    assert_eq!(peer.unacknowledged_receive_bytes(), 0, "被丢弃的入站不占额度");

    harness
        .dispatcher
        .on_received(handle, NativeBuffer::transferable(vec![6; 2]))
        .expect("后续事件正常投递");
    assert_eq!(target.received(), vec![6; 2]);

    let metrics = harness.manager.metrics().snapshot();
    assert_eq!(metrics.attach_failures, 1);
    assert_eq!(metrics.dropped, 1);
}

fn pending_fault_skips_callback() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    peer.write(Bytes::from_static(b"abc")).expect("写出");
    let detaches = harness.runtime.detach_count();

    harness.runtime.inject_fault();
    let err = harness
        .dispatcher
        .on_write_completed(peer.handle(), 3)
        .expect_err("存在未处理托管异常");
    assert!(matches!(
        err,
        BridgeError::RuntimeAttachment {
            reason: AttachFailure::PendingFault,
            ..
        }
    ));
    assert_eq!(target.event_names(), ["on_open"]);
    assert_eq!(harness.runtime.detach_count(), detaches + 1, "放弃回调时仍然分离");
}

/// `on_closed` 附着失败时不拆除句柄，原生侧重新投递后正常完成。
fn on_closed_attach_failure_allows_redelivery() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    let handle = peer.handle();

    harness.runtime.fail_next_attach(-1);
    let err = harness
        .dispatcher
        .on_closed(handle, 5, 18, b"reset")
        .expect_err("附着失败");
    assert_eq!(err.code(), "bridge.runtime.attach");
    assert_eq!(peer.state(), SocketState::Open, "状态回退");
    assert!(harness.manager.registry().contains(handle));
    assert!(!target.is_closed());

    harness
        .dispatcher
        .on_closed(handle, 5, 18, b"reset")
        .expect("重新投递");
    assert_eq!(peer.state(), SocketState::Disposed);
    assert_eq!(harness.manager.metrics().snapshot().disposed, 1);
}

fn detach_failure_still_delivers() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness.runtime.fail_detach(true);
    harness
        .dispatcher
        .on_received(peer.handle(), NativeBuffer::transferable(b"ok".to_vec()))
        .expect("分离失败只记录日志");
    assert_eq!(target.received(), b"ok");
}

/// 关闭请求附着失败：状态回到投递前，托管侧仍可完成握手，重新投递后照常进入 `ClosePending`。
fn close_request_attach_failure_keeps_handshake_open() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::new());
    let handle = peer.handle();
    assert_eq!(peer.state(), SocketState::Opening);

    harness.runtime.fail_next_attach(-3);
    let err = harness
        .dispatcher
        .on_close_requested(handle, 1001, b"going away")
        .expect_err("附着失败");
    assert_eq!(err.code(), "bridge.runtime.attach");
    assert_eq!(peer.state(), SocketState::Opening, "被丢弃的关闭请求不改变状态");
    assert_eq!(target.event_names(), ["on_open"]);

    peer.opened().expect("握手仍可完成");
    assert_eq!(peer.state(), SocketState::Open);

    harness
        .dispatcher
        .on_close_requested(handle, 1001, b"going away")
        .expect("重新投递");
    assert_eq!(peer.state(), SocketState::ClosePending);
    assert_eq!(target.event_names(), ["on_open", "on_close_requested"]);
}

/// 在 `on_received` 中 panic 的回调目标。
struct PanickingTarget;

impl CallbackTarget for PanickingTarget {
    fn on_open(&self, peer: &SocketPeer, _: &Address, _: &Bytes) {
        let _ = peer.opened();
    }
    fn on_write_completed(&self, _: &SocketPeer, _: usize) {}
    fn on_received(&self, _: &SocketPeer, _: Bytes) {
        panic!("managed callback failed");
    }
    fn on_close_requested(&self, _: &SocketPeer, _: i32, _: &str) {}
    fn on_closed(&self, _: &SocketPeer, _: &ManagedError) {}
}

fn panicking_callback_still_detaches() {
    let harness = BridgeHarness::new();
    let address = sync_address();
    let peer = harness
        .manager
        .open_outbound(&address, None, Arc::new(PanickingTarget))
        .expect("打开");
    harness
        .dispatcher
        .on_open(peer.handle(), address, NativeBuffer::transferable(Vec::new()))
        .expect("on_open");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _ = harness
            .dispatcher
            .on_received(peer.handle(), NativeBuffer::transferable(vec![0; 1]));
    }));
    assert!(outcome.is_err(), "回调 panic 向调用方传播");
    assert_eq!(harness.runtime.attach_count(), harness.runtime.detach_count());
    assert!(!harness.runtime.is_calling_thread_attached());
}

/// 在 `on_closed` 中 panic 的回调目标。
struct PanicOnClosed;

impl CallbackTarget for PanicOnClosed {
    fn on_open(&self, peer: &SocketPeer, _: &Address, _: &Bytes) {
        let _ = peer.opened();
    }
    fn on_write_completed(&self, _: &SocketPeer, _: usize) {}
    fn on_received(&self, _: &SocketPeer, _: Bytes) {}
    fn on_close_requested(&self, _: &SocketPeer, _: i32, _: &str) {}
    fn on_closed(&self, _: &SocketPeer, _: &ManagedError) {
        panic!("managed close handler failed");
    }
}

/// `on_closed` 回调 panic：panic 照常传播，但原生引用仍被释放，句柄恰好拆除一次。
fn panicking_on_closed_still_disposes() {
    let harness = BridgeHarness::new();
    let address = sync_address();
    let peer = harness
        .manager
        .open_outbound(&address, None, Arc::new(PanicOnClosed))
        .expect("打开");
    let handle = peer.handle();
    harness
        .dispatcher
        .on_open(handle, address, NativeBuffer::transferable(Vec::new()))
        .expect("on_open");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _ = harness.dispatcher.on_closed(handle, 1, 0, b"");
    }));
    assert!(outcome.is_err(), "回调 panic 向调用方传播");
    assert_eq!(peer.state(), SocketState::Disposed);
    assert!(!harness.manager.registry().contains(handle));
    assert_eq!(harness.manager.metrics().snapshot().disposed, 1);
    assert_eq!(harness.runtime.attach_count(), harness.runtime.detach_count());

    let err = harness
        .dispatcher
        .on_closed(handle, 1, 0, b"")
        .expect_err("拆除后的重投被丢弃");
    assert_eq!(err, BridgeError::UnknownHandle { handle });
}

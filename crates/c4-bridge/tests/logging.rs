//! 日志契约：可恢复故障记录 `warn`，不变量破坏记录 `error`，均落在 `c4_bridge::network` 目标下。

use c4_bridge::NativeBuffer;
use c4_bridge_tck::{BridgeHarness, RecordingTarget, sync_address};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn unknown_handle_logs_event_dropped() {
    let harness = BridgeHarness::new();
    let stray = harness.engine.allocate_handle();
    let _ = harness
        .dispatcher
        .on_received(stray, NativeBuffer::transferable(vec![1]));
    assert!(logs_contain("event dropped"));
    assert!(logs_contain("c4_bridge::network"));
}

#[traced_test]
#[test]
fn detach_failure_logs_warning() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness.runtime.fail_detach(true);
    harness
        .dispatcher
        .on_close_requested(peer.handle(), 1000, b"bye")
        .expect("分离失败不影响投递");
    assert!(logs_contain("failed to detach thread from managed runtime"));
}

#[traced_test]
#[test]
fn undecodable_message_logs_placeholder_warning() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness
        .dispatcher
        .on_closed(peer.handle(), 6, 1002, &[0xff])
        .expect("on_closed");
    assert!(logs_contain("native message replaced by placeholder"));
    assert!(logs_contain("bridge.translate.transcode"));
}

#[traced_test]
#[test]
fn invariant_violation_logs_error() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness
        .dispatcher
        .on_closed(peer.handle(), 1, 0, b"")
        .expect("on_closed");
    let _ = peer.release();
    assert!(logs_contain("bridge invariant violated"));
    assert!(logs_contain("ERROR"));
}

#[traced_test]
#[test]
fn pending_fault_logs_error() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness.runtime.inject_fault();
    let _ = harness
        .dispatcher
        .on_received(peer.handle(), NativeBuffer::transferable(vec![1]));
    assert!(logs_contain("managed runtime has a pending fault; callback skipped"));
    assert!(logs_contain("ERROR"));
    assert!(!logs_contain("managed runtime context unavailable"));
}

#[traced_test]
#[test]
fn attach_failure_logs_warning_only() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness.runtime.fail_next_attach(-3);
    let _ = harness
        .dispatcher
        .on_received(peer.handle(), NativeBuffer::transferable(vec![1]));
    assert!(logs_contain("managed runtime context unavailable"));
    assert!(!logs_contain("callback skipped"));
}

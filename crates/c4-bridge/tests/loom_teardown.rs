#![cfg(loom)]

//! 拆除唯一性的 Loom 模型。
//!
//! `--cfg loom` 下 `HandleLifecycle` 的互斥锁换成 Loom 实现，这里通过真实的
//! [`TransportManager`]、[`CallbackDispatcher`](c4_bridge::CallbackDispatcher) 与 [`SocketPeer`]
//! 穷举原生关闭线程与托管线程的全部加锁交错。
//!
//! 运行：`RUSTFLAGS="--cfg loom" cargo test -p c4-bridge --test loom_teardown --release`

use std::sync::Arc;

use c4_bridge::{
    BridgeConfig, CallbackTarget, InProcessRuntime, ManagedError, ManagedRuntime, NativeBuffer,
    NativeEngine, SocketPeer, SocketState, TransportManager,
};
use c4_bridge_tck::{MockEngine, RecordingTarget, sync_address};
use loom::{model, thread};

/// 建立一条已打开的会话。
fn open_session() -> (TransportManager, SocketPeer, Arc<RecordingTarget>) {
    let engine = Arc::new(MockEngine::new());
    let manager = TransportManager::new(
        engine as Arc<dyn NativeEngine>,
        Arc::new(InProcessRuntime) as Arc<dyn ManagedRuntime>,
        BridgeConfig::default(),
    )
    .expect("默认配置合法");
    let address = sync_address();
    let target = RecordingTarget::cooperative();
    let peer = manager
        .open_outbound(&address, None, Arc::clone(&target) as Arc<dyn CallbackTarget>)
        .expect("打开");
    manager
        .dispatcher()
        .on_open(peer.handle(), address, NativeBuffer::transferable(Vec::new()))
        .expect("on_open");
    assert_eq!(peer.state(), SocketState::Open);
    (manager, peer, target)
}

fn spawn_native_close(manager: &TransportManager, peer: &SocketPeer) -> thread::JoinHandle<()> {
    let dispatcher = manager.dispatcher();
    let handle = peer.handle();
    thread::spawn(move || {
        dispatcher
            .on_closed(handle, 1, 0, b"")
            .expect("on_closed 恰好投递一次");
    })
}

fn assert_disposed_once(manager: &TransportManager, peer: &SocketPeer, target: &RecordingTarget) {
    assert_eq!(peer.state(), SocketState::Disposed);
    assert!(manager.registry().is_empty());
    assert_eq!(manager.metrics().snapshot().disposed, 1);
    assert!(target.is_closed());
    assert!(target.violations().is_empty(), "{:?}", target.violations());
}

#[test]
fn native_close_and_managed_release_tear_down_once() {
    model(|| {
        let (manager, peer, target) = open_session();
        peer.retain().expect("托管引用");

        let native = spawn_native_close(&manager, &peer);
        let managed = {
            let peer = peer.clone();
            thread::spawn(move || peer.release().expect("配对的 release"))
        };

        native.join().expect("原生线程不应 panic");
        managed.join().expect("托管线程不应 panic");
        assert_disposed_once(&manager, &peer, &target);
        assert!(peer.release().is_err(), "拆除后的 release 必须被拒绝");
    });
}

#[test]
fn late_retain_never_resurrects_a_closed_handle() {
    model(|| {
        let (manager, peer, target) = open_session();

        let native = spawn_native_close(&manager, &peer);
        let managed = {
            let peer = peer.clone();
            thread::spawn(move || {
                if peer.retain().is_ok() {
                    peer.release().expect("配对的 release");
                }
            })
        };

        native.join().expect("原生线程不应 panic");
        managed.join().expect("托管线程不应 panic");
        assert_disposed_once(&manager, &peer, &target);
    });
}

#[test]
fn managed_close_races_native_close() {
    model(|| {
        let (manager, peer, target) = open_session();

        let native = spawn_native_close(&manager, &peer);
        let managed = {
            let peer = peer.clone();
            thread::spawn(move || {
                // 落败时 on_closed 已投递，closed() 被静默忽略。
                peer.closed(&ManagedError::success()).expect("closed 不报错");
            })
        };

        native.join().expect("原生线程不应 panic");
        managed.join().expect("托管线程不应 panic");
        assert_disposed_once(&manager, &peer, &target);
    });
}

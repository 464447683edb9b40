use std::sync::Arc;

use c4_bridge::{
    BridgeConfig, BridgeError, CallbackTarget, Framing, InProcessRuntime, ManagedRuntime,
    NativeBuffer, NativeEngine, TransportManager,
};
use c4_bridge_tck::{BridgeHarness, EngineCall, MockEngine, RecordingTarget, sync_address};

fn in_process(engine: &Arc<MockEngine>, config: BridgeConfig) -> Result<TransportManager, BridgeError> {
    TransportManager::new(
        Arc::clone(engine) as Arc<dyn NativeEngine>,
        Arc::new(InProcessRuntime) as Arc<dyn ManagedRuntime>,
        config,
    )
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let engine = Arc::new(MockEngine::new());
    let err = in_process(
        &engine,
        BridgeConfig {
            max_pending_write_bytes: 0,
            ..BridgeConfig::default()
        },
    )
    .expect_err("零写入上限");
    assert_eq!(err.code(), "bridge.config.invalid");
}

#[test]
fn outbound_framing_defaults_to_config() {
    let engine = Arc::new(MockEngine::new());
    let manager = in_process(
        &engine,
        BridgeConfig::from_toml_str("default_framing = \"web_socket_client\"").expect("配置"),
    )
    .expect("实例");
    let address = sync_address();

    let implicit = manager
        .open_outbound(&address, None, RecordingTarget::new() as Arc<dyn CallbackTarget>)
        .expect("默认分帧");
    let explicit = manager
        .open_outbound(
            &address,
            Some(Framing::WebSocketServer),
            RecordingTarget::new() as Arc<dyn CallbackTarget>,
        )
        .expect("显式分帧");

    let framings: Vec<_> = engine
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EngineCall::Created { handle, framing, .. } => Some((handle, framing)),
            _ => None,
        })
        .collect();
    assert_eq!(
        framings,
        [
            (implicit.handle(), Framing::WebSocketClient),
            (explicit.handle(), Framing::WebSocketServer)
        ]
    );
    assert_eq!(manager.registry().len(), 2);
}

#[test]
fn in_process_runtime_delivers_without_attaching() {
    let engine = Arc::new(MockEngine::new());
    let manager = in_process(&engine, BridgeConfig::default()).expect("实例");
    let address = sync_address();
    let target = RecordingTarget::cooperative();
    let peer = manager
        .open_outbound(&address, None, Arc::clone(&target) as Arc<dyn CallbackTarget>)
        .expect("打开");
    let dispatcher = manager.dispatcher();
    dispatcher
        .on_open(peer.handle(), address, NativeBuffer::transferable(Vec::new()))
        .expect("on_open");
    dispatcher
        .on_received(peer.handle(), NativeBuffer::transferable(b"x".to_vec()))
        .expect("入站");
    assert_eq!(target.received(), b"x");
    assert_eq!(manager.metrics().snapshot().dispatched, 2);
}

#[test]
fn instances_do_not_share_registries() {
    let first = BridgeHarness::new();
    let second = BridgeHarness::new();
    let (peer, _target) = first.open(&sync_address(), RecordingTarget::cooperative());

    assert!(first.manager.registry().contains(peer.handle()));
    assert!(!second.manager.registry().contains(peer.handle()));
    let err = second
        .dispatcher
        .on_write_completed(peer.handle(), 0)
        .expect_err("另一实例不认识该句柄");
    assert_eq!(err, BridgeError::UnknownHandle { handle: peer.handle() });
}

#[test]
fn weak_dispatcher_does_not_keep_bridge_alive() {
    let engine = Arc::new(MockEngine::new());
    let manager = in_process(&engine, BridgeConfig::default()).expect("实例");
    let weak = manager.dispatcher().downgrade();
    assert!(weak.upgrade().is_some());
    drop(manager);
    assert!(weak.upgrade().is_none());
}

use c4_bridge::{
    Address, BridgeConfig, CallbackDispatcher, CallbackTarget, ManagedRuntime, NativeBuffer,
    NativeEngine, SocketPeer, TransportManager,
};
use std::sync::Arc;

use crate::engine::MockEngine;
use crate::runtime::SimulatedRuntime;
use crate::target::RecordingTarget;

/// 装配好的测试桥：模拟引擎 + 模拟运行时 + 桥接实例。
///
/// 调度器已挂接到引擎上，`echo_closed` 默认关闭。
pub struct BridgeHarness {
    pub engine: Arc<MockEngine>,
    pub runtime: Arc<SimulatedRuntime>,
    pub manager: TransportManager,
    pub dispatcher: CallbackDispatcher,
}

impl BridgeHarness {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let engine = Arc::new(MockEngine::new());
        let runtime = Arc::new(SimulatedRuntime::new());
        let manager = match TransportManager::new(
            Arc::clone(&engine) as Arc<dyn NativeEngine>,
            Arc::clone(&runtime) as Arc<dyn ManagedRuntime>,
            config,
        ) {
            Ok(manager) => manager,
            Err(err) => panic!("测试配置非法：{err}"),
        };
        let dispatcher = manager.dispatcher();
        engine.attach_dispatcher(&dispatcher);
        Self {
            engine,
            runtime,
            manager,
            dispatcher,
        }
    }

    /// 创建出站连接并完成 `on_open`，返回托管侧句柄与记录目标。
    pub fn open(
        &self,
        address: &Address,
        target: Arc<RecordingTarget>,
    ) -> (SocketPeer, Arc<RecordingTarget>) {
        let outbound = self
            .manager
            .open_outbound(address, None, Arc::clone(&target) as Arc<dyn CallbackTarget>);
        let peer = match outbound {
            Ok(peer) => peer,
            Err(err) => panic!("打开出站连接失败：{err}"),
        };
        if let Err(err) = self.dispatcher.on_open(
            peer.handle(),
            address.clone(),
            NativeBuffer::transferable(Vec::new()),
        ) {
            panic!("on_open 投递失败：{err}");
        }
        (peer, target)
    }
}

impl Default for BridgeHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// 测试中常用的同步端点地址。
pub fn sync_address() -> Address {
    Address::new("wss", "x.example", 443, "/db/_blipsync")
}

use crate::case::{TckCase, TckSuite};
use crate::harness::{BridgeHarness, sync_address};
use crate::target::RecordingTarget;
use bytes::Bytes;
use c4_bridge::{
    Address, BridgeError, ManagedError, NativeBuffer, SocketPeer, SocketState,
    codes,
};
use std::sync::{Arc, Barrier};
use std::thread;

/// 关闭竞争的迭代次数。
pub const CLOSE_RACE_ITERATIONS: usize = 1000;

const CASES: &[TckCase] = &[
    TckCase {
        name: "close_race_tears_down_exactly_once",
        test: close_race_tears_down_exactly_once,
    },
    TckCase {
        name: "interleaved_handles_keep_per_handle_order",
        test: interleaved_handles_keep_per_handle_order,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "ordering",
    cases: CASES,
};

/// 返回“顺序与并发”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 原生侧关闭与托管侧关闭/释放并发竞争，拆除必须恰好一次。
///
/// # 教案式说明
/// - **意图 (Why)**：原生线程投递 `on_close_requested → on_closed` 的同时，托管线程调用 `closed()`
///   并归还自己持有的引用；无论谁先把计数降到零，拆除都只能发生一次；
/// - **逻辑 (How)**：每轮新建一个句柄并预先 retain，两条线程在屏障处同时起跑；
/// - **契约 (What)**：每轮结束后 `disposed` 恰好增加 1，目标恰好收到一次 `on_closed`，原生 `closed` 至多一次。
fn close_race_tears_down_exactly_once() {
    let harness = BridgeHarness::new();
    let address = sync_address();

    for iteration in 0..CLOSE_RACE_ITERATIONS {
        let (peer, target) = harness.open(&address, RecordingTarget::cooperative());
        let handle = peer.handle();
        peer.retain().expect("retain");
        let barrier = Barrier::new(2);

        thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                let _ = harness.dispatcher.on_close_requested(
                    handle,
                    codes::websocket::GOING_AWAY,
                    b"going away",
                );
                harness
                    .dispatcher
                    .on_closed(handle, 6, codes::websocket::GOING_AWAY, b"going away")
                    .expect("原生关闭总能投递");
            });
            scope.spawn(|| {
                barrier.wait();
                let _ = peer.closed(&ManagedError::from_close_code(
                    codes::websocket::GOING_AWAY,
                    None,
                ));
                peer.release().expect("托管引用归还");
            });
        });

        let metrics = harness.manager.metrics().snapshot();
        assert_eq!(
            metrics.disposed,
            iteration as u64 + 1,
            "第 {iteration} 轮拆除次数异常"
        );
        assert_eq!(metrics.invariant_violations, 0, "第 {iteration} 轮出现不变量破坏");
        assert_eq!(peer.state(), SocketState::Disposed);
        assert!(!harness.manager.registry().contains(handle));
        assert_eq!(
            target
                .event_names()
                .iter()
                .filter(|name| **name == "on_closed")
                .count(),
            1
        );
        assert!(harness.engine.closed_count(handle) <= 1);
        assert!(target.violations().is_empty(), "{:?}", target.violations());
    }
    assert!(harness.manager.registry().is_empty());
}

const HANDLE_COUNT: usize = 100;
const WORKERS: usize = 8;
/// 每个句柄在打开与关闭之间的流事件数，入站与写确认交替。
const STREAM_EVENTS: usize = 10;
const RECEIVES: usize = STREAM_EVENTS / 2;

fn expected_names() -> Vec<&'static str> {
    let mut names = vec!["on_open"];
    for round in 0..STREAM_EVENTS {
        names.push(if round % 2 == 0 { "on_received" } else { "on_write_completed" });
    }
    names.extend(["on_close_requested", "on_closed"]);
    names
}

/// 8 条原生线程交错驱动 100 个句柄，每个句柄 10 个交替的入站/写确认事件。
///
/// # 教案式说明
/// - **意图 (Why)**：不同句柄的事件可以在任意线程上并发，同一句柄的事件由其所属线程串行投递；
/// - **逻辑 (How)**：每条线程按轮次推进自己名下所有句柄，使不同句柄的事件彼此交错；
/// - **契约 (What)**：结束后所有句柄处于 `Disposed`，每个目标看到的事件序列与投递顺序一致，
///   且拆除后的补投事件全部以未知句柄丢弃。
fn interleaved_handles_keep_per_handle_order() {
    let harness = BridgeHarness::new();
    let address = sync_address();

    let sessions: Vec<(SocketPeer, Arc<RecordingTarget>)> = thread::scope(|scope| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let harness = &harness;
                let address = &address;
                scope.spawn(move || drive_worker(harness, address, worker))
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("工作线程不应 panic"))
            .collect()
    });

    assert_eq!(sessions.len(), HANDLE_COUNT);
    let expected = expected_names();
    for (peer, target) in &sessions {
        assert_eq!(peer.state(), SocketState::Disposed);
        assert_eq!(target.event_names(), expected, "{} 的事件序列", peer.handle());
        assert!(target.violations().is_empty(), "{:?}", target.violations());
        assert_eq!(target.received().len(), RECEIVES * 4);
    }
    assert!(harness.manager.registry().is_empty());
    let metrics = harness.manager.metrics().snapshot();
    assert_eq!(metrics.registered, HANDLE_COUNT as u64);
    assert_eq!(metrics.disposed, HANDLE_COUNT as u64);
    assert_eq!(metrics.invariant_violations, 0);

    for (peer, target) in &sessions {
        let err = harness
            .dispatcher
            .on_received(peer.handle(), NativeBuffer::transferable(vec![0; 4]))
            .expect_err("拆除后的事件必须丢弃");
        assert_eq!(err, BridgeError::UnknownHandle { handle: peer.handle() });
        assert_eq!(target.event_names().len(), expected.len());
    }
}

fn drive_worker(
    harness: &BridgeHarness,
    address: &Address,
    worker: usize,
) -> Vec<(SocketPeer, Arc<RecordingTarget>)> {
    let owned = (0..HANDLE_COUNT).filter(|index| index % WORKERS == worker).count();
    let sessions: Vec<_> = (0..owned)
        .map(|_| harness.open(address, RecordingTarget::cooperative()))
        .collect();

    for round in 0..STREAM_EVENTS {
        for (peer, _) in &sessions {
            if round % 2 == 0 {
                let payload = vec![round as u8; 4];
                harness
                    .dispatcher
                    .on_received(peer.handle(), NativeBuffer::transferable(payload))
                    .expect("入站");
            } else {
                peer.write(Bytes::from_static(b"ping")).expect("写出");
                harness
                    .dispatcher
                    .on_write_completed(peer.handle(), 4)
                    .expect("写确认");
            }
        }
    }
    for (peer, _) in &sessions {
        harness
            .dispatcher
            .on_close_requested(peer.handle(), codes::websocket::NORMAL, b"done")
            .expect("关闭请求");
    }
    for (peer, _) in &sessions {
        peer.closed(&ManagedError::success()).expect("托管关闭");
        harness
            .dispatcher
            .on_closed(peer.handle(), 1, codes::LITECORE_SUCCESS, b"")
            .expect("on_closed");
    }
    sessions
}

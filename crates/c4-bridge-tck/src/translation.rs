use crate::case::{TckCase, TckSuite};
use crate::engine::EngineCall;
use crate::harness::{BridgeHarness, sync_address};
use crate::target::RecordingTarget;
use c4_bridge::{
    BridgeError, CallbackTarget, ErrorDomain, ManagedError, SocketEvent, TRANSCODE_PLACEHOLDER,
    codes,
};
use std::sync::Arc;

const CASES: &[TckCase] = &[
    TckCase {
        name: "native_error_triple_reaches_target_verbatim",
        test: native_error_triple_reaches_target_verbatim,
    },
    TckCase {
        name: "undecodable_messages_use_placeholder",
        test: undecodable_messages_use_placeholder,
    },
    TckCase {
        name: "http_close_codes_are_forwarded_as_policy_errors",
        test: http_close_codes_are_forwarded_as_policy_errors,
    },
    TckCase {
        name: "refused_outbound_surfaces_native_error",
        test: refused_outbound_surfaces_native_error,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "translation",
    cases: CASES,
};

/// 返回“错误翻译”主题的测试套件。
pub const fn suite() -> &'static TckSuite {
    &SUITE
}

fn native_error_triple_reaches_target_verbatim() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness
        .dispatcher
        .on_closed(
            peer.handle(),
            ErrorDomain::Network.as_raw(),
            codes::network::CONNECTION_REFUSED,
            b"connection refused",
        )
        .expect("on_closed");
    let error = target.closed_error().expect("目标收到 on_closed");
    assert_eq!(error.domain(), ErrorDomain::Network);
    assert_eq!(error.code(), codes::network::CONNECTION_REFUSED);
    assert_eq!(error.message(), "connection refused");

    let (custom_peer, custom_target) =
        harness.open(&sync_address(), RecordingTarget::cooperative());
    harness
        .dispatcher
        .on_closed(custom_peer.handle(), 42, -7, b"")
        .expect("未知域同样透传");
    let error = custom_target.closed_error().expect("目标收到 on_closed");
    assert_eq!(error.domain(), ErrorDomain::Other(42));
    assert_eq!(error.code(), -7);
}

fn undecodable_messages_use_placeholder() {
    let harness = BridgeHarness::new();
    let (peer, target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    harness
        .dispatcher
        .on_close_requested(peer.handle(), codes::websocket::PROTOCOL_ERROR, &[0xff, 0xfe])
        .expect("非法字节不阻断投递");
    harness
        .dispatcher
        .on_closed(peer.handle(), 6, codes::websocket::PROTOCOL_ERROR, &[0xc3, 0x28])
        .expect("on_closed");

    let events = target.events();
    match &events[1] {
        SocketEvent::CloseRequested { status, message } => {
            assert_eq!(*status, codes::websocket::PROTOCOL_ERROR);
            assert_eq!(message, TRANSCODE_PLACEHOLDER);
        }
        other => panic!("预期关闭请求，得到 {other:?}"),
    }
    let error = target.closed_error().expect("目标收到 on_closed");
    assert_eq!(error.code(), codes::websocket::PROTOCOL_ERROR);
    assert_eq!(error.message(), TRANSCODE_PLACEHOLDER);
}

fn http_close_codes_are_forwarded_as_policy_errors() {
    let harness = BridgeHarness::new();
    let (peer, _target) = harness.open(&sync_address(), RecordingTarget::cooperative());
    peer.got_http_response(403, b"Content-Length: 0\r\n")
        .expect("握手响应");
    peer.closed(&ManagedError::from_close_code(403, Some("forbidden")))
        .expect("托管关闭");

    let calls = harness.engine.calls_for(peer.handle());
    assert!(calls.contains(&EngineCall::HttpResponse {
        handle: peer.handle(),
        status: 403,
        headers: b"Content-Length: 0\r\n".to_vec(),
    }));
    let forwarded = calls.iter().find_map(|call| match call {
        EngineCall::Closed { error, .. } => Some(error.clone()),
        _ => None,
    });
    let forwarded = forwarded.expect("原生侧收到 closed");
    assert_eq!(forwarded.domain(), ErrorDomain::WebSocket);
    assert_eq!(forwarded.code(), codes::websocket::POLICY_ERROR);
    assert_eq!(forwarded.message(), "forbidden");
}

fn refused_outbound_surfaces_native_error() {
    let harness = BridgeHarness::new();
    harness.engine.refuse_next_create(ManagedError::new(
        ErrorDomain::Network,
        codes::network::UNKNOWN_HOST,
        "unknown host",
    ));
    let outcome = harness.manager.open_outbound(
        &sync_address(),
        None,
        RecordingTarget::new() as Arc<dyn CallbackTarget>,
    );
    match outcome {
        Err(BridgeError::NativeEngine(error)) => {
            assert_eq!(error.domain(), ErrorDomain::Network);
            assert_eq!(error.code(), codes::network::UNKNOWN_HOST);
        }
        other => panic!("预期原生错误，得到 {other:?}"),
    }
    assert!(harness.manager.registry().is_empty());
}

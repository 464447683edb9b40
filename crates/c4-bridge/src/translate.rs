//! 错误记录翻译：`(domain, code, message-bytes)` → [`ManagedError`]。
//!
//! # 教案式说明
//! - **意图 (Why)**：原生引擎的错误是带标签的三元组，托管调用方依赖域与错误码做分支，
//!   因此两者必须逐位保留；消息文本仅用于排障，转码失败时允许降级；
//! - **契约 (What)**：[`translate`] 永不失败也永不 panic，非法字节序列产生
//!   [`TRANSCODE_PLACEHOLDER`] 并记录一条 `warn` 日志；
//! - **执行 (How)**：优先无损 UTF-8 解码；失败时通过 [`decode_message`] 返回的
//!   [`BridgeError::Transcoding`] 驱动降级。

use thiserror::Error;

use crate::codes::{self, ErrorDomain};
use crate::error::BridgeError;
use crate::observability::LOG_TARGET;

/// 消息字节无法转码时使用的固定占位文本。
pub const TRANSCODE_PLACEHOLDER: &str = "<undecodable native message>";

/// 托管侧的错误表示。
#[derive(Clone, Debug, Error, Eq, Hash, PartialEq)]
#[error("{domain}/{code}: {message}")]
pub struct ManagedError {
    domain: ErrorDomain,
    code: i32,
    message: String,
}

impl ManagedError {
    pub fn new(domain: ErrorDomain, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }

    /// 表示“正常关闭”的错误记录：`LiteCore` 域、错误码 `0`、空消息。
    pub fn success() -> Self {
        Self::new(ErrorDomain::LiteCore, codes::LITECORE_SUCCESS, String::new())
    }

    /// 依据 WebSocket 关闭码生成最终错误记录。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：远端关闭时只给出关闭码与原因，原生引擎期望得到一条完整错误记录；
    /// - **逻辑 (How)**：
    ///   1. `1000` 视为成功，映射为 [`ManagedError::success`]；
    ///   2. 落在 HTTP 状态区间 `(100, 600)` 的关闭码被重写为策略错误 `1008`；
    ///   3. 其余关闭码归入 `WebSocket` 域原样保留。
    /// - **契约 (What)**：`reason` 为空时消息为空字符串。
    pub fn from_close_code(code: i32, reason: Option<&str>) -> Self {
        if code == codes::websocket::NORMAL {
            return Self::success();
        }
        let code = if code > codes::http::STATUS_MIN && code < codes::http::STATUS_MAX {
            codes::websocket::POLICY_ERROR
        } else {
            code
        };
        Self::new(ErrorDomain::WebSocket, code, reason.unwrap_or_default())
    }

    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 是否为成功记录。
    pub fn is_success(&self) -> bool {
        self.domain == ErrorDomain::LiteCore && self.code == codes::LITECORE_SUCCESS
    }
}

/// 严格解码消息字节；失败时返回 [`BridgeError::Transcoding`]。
pub fn decode_message(bytes: &[u8]) -> Result<String, BridgeError> {
    core::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|err| BridgeError::Transcoding {
            detail: format!(
                "invalid byte sequence at offset {} of {}",
                err.valid_up_to(),
                bytes.len()
            ),
        })
}

/// 解码原生消息文本；非法字节序列降级为 [`TRANSCODE_PLACEHOLDER`] 并记录 `warn`。
pub fn decode_or_placeholder(bytes: &[u8]) -> String {
    match decode_message(bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(
                target: LOG_TARGET,
                code = err.code(),
                error = %err,
                "native message replaced by placeholder"
            );
            TRANSCODE_PLACEHOLDER.to_owned()
        }
    }
}

/// 将原生错误三元组翻译为托管错误。
pub fn translate(domain: i32, code: i32, message: &[u8]) -> ManagedError {
    ManagedError::new(ErrorDomain::from_raw(domain), code, decode_or_placeholder(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn translation_preserves_valid_text() {
        let err = translate(6, 1000, b"abc");
        assert_eq!(err.domain(), ErrorDomain::WebSocket);
        assert_eq!(err.code(), 1000);
        assert_eq!(err.message(), "abc");
    }

    #[test]
    fn invalid_utf8_degrades_to_placeholder() {
        let err = translate(5, 19, &[0x66, 0xff, 0xfe]);
        assert_eq!(err.domain(), ErrorDomain::Network);
        assert_eq!(err.code(), 19);
        assert_eq!(err.message(), TRANSCODE_PLACEHOLDER);
        assert!(decode_message(&[0xc3]).is_err());
    }

    #[test]
    fn close_codes_map_to_final_records() {
        assert!(ManagedError::from_close_code(1000, Some("bye")).is_success());

        let http = ManagedError::from_close_code(401, Some("unauthorized"));
        assert_eq!(http.domain(), ErrorDomain::WebSocket);
        assert_eq!(http.code(), codes::websocket::POLICY_ERROR);
        assert_eq!(http.message(), "unauthorized");

        let going_away = ManagedError::from_close_code(1001, None);
        assert_eq!(going_away.code(), 1001);
        assert_eq!(going_away.message(), "");
    }

    proptest! {
        #[test]
        fn prop_valid_text_round_trips(domain in any::<i32>(), code in any::<i32>(), text in ".*") {
            let err = translate(domain, code, text.as_bytes());
            prop_assert_eq!(err.domain().as_raw(), domain);
            prop_assert_eq!(err.code(), code);
            prop_assert_eq!(err.message(), text.as_str());
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let err = translate(1, 2, &bytes);
            match core::str::from_utf8(&bytes) {
                Ok(text) => prop_assert_eq!(err.message(), text),
                Err(_) => prop_assert_eq!(err.message(), TRANSCODE_PLACEHOLDER),
            }
        }
    }
}

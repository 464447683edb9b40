//! 原生错误域与常用错误码。
//!
//! 数值与原生引擎头文件保持一致，跨边界时按 `i32` 原样传递，禁止重新编号。

use core::fmt;

/// 错误来源域。
///
/// # 教案式说明
/// - **意图 (Why)**：原生调用方依赖 `(domain, code)` 做精确分支，托管侧必须逐位保留；
/// - **契约 (What)**：未登记的域值落入 [`ErrorDomain::Other`]，`as_raw` 仍返回原值，保证 round-trip；
/// - **风险 (Trade-offs)**：新增域时需同步 `from_raw`/`as_raw` 两处映射。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorDomain {
    LiteCore,
    Posix,
    Sqlite,
    Fleece,
    Network,
    WebSocket,
    MbedTls,
    Other(i32),
}

impl ErrorDomain {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ErrorDomain::LiteCore,
            2 => ErrorDomain::Posix,
            3 => ErrorDomain::Sqlite,
            4 => ErrorDomain::Fleece,
            5 => ErrorDomain::Network,
            6 => ErrorDomain::WebSocket,
            7 => ErrorDomain::MbedTls,
            other => ErrorDomain::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            ErrorDomain::LiteCore => 1,
            ErrorDomain::Posix => 2,
            ErrorDomain::Sqlite => 3,
            ErrorDomain::Fleece => 4,
            ErrorDomain::Network => 5,
            ErrorDomain::WebSocket => 6,
            ErrorDomain::MbedTls => 7,
            ErrorDomain::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::LiteCore => f.write_str("LiteCore"),
            ErrorDomain::Posix => f.write_str("POSIX"),
            ErrorDomain::Sqlite => f.write_str("SQLite"),
            ErrorDomain::Fleece => f.write_str("Fleece"),
            ErrorDomain::Network => f.write_str("Network"),
            ErrorDomain::WebSocket => f.write_str("WebSocket"),
            ErrorDomain::MbedTls => f.write_str("mbedTLS"),
            ErrorDomain::Other(raw) => write!(f, "Domain({raw})"),
        }
    }
}

/// WebSocket 关闭码（RFC 6455 及引擎扩展）。
pub mod websocket {
    pub const NORMAL: i32 = 1000;
    pub const GOING_AWAY: i32 = 1001;
    pub const PROTOCOL_ERROR: i32 = 1002;
    pub const DATA_ERROR: i32 = 1003;
    pub const NO_CODE: i32 = 1005;
    pub const ABNORMAL_CLOSE: i32 = 1006;
    pub const BAD_MESSAGE_FORMAT: i32 = 1007;
    pub const POLICY_ERROR: i32 = 1008;
    pub const MESSAGE_TOO_BIG: i32 = 1009;
    pub const MISSING_EXTENSION: i32 = 1010;
    pub const CANT_FULFILL: i32 = 1011;
    pub const TLS_FAILURE: i32 = 1015;
    pub const USER_TRANSIENT: i32 = 4001;
    pub const USER_PERMANENT: i32 = 4002;
}

/// `Network` 域错误码。
pub mod network {
    pub const DNS_FAILURE: i32 = 1;
    pub const UNKNOWN_HOST: i32 = 2;
    pub const TIMEOUT: i32 = 3;
    pub const INVALID_URL: i32 = 4;
    pub const TOO_MANY_REDIRECTS: i32 = 5;
    pub const TLS_HANDSHAKE_FAILED: i32 = 6;
    pub const TLS_CERT_EXPIRED: i32 = 7;
    pub const TLS_CERT_UNTRUSTED: i32 = 8;
    pub const TLS_CERT_REVOKED: i32 = 14;
    pub const CONNECTION_RESET: i32 = 18;
    pub const CONNECTION_REFUSED: i32 = 19;
    pub const NOT_CONNECTED: i32 = 22;
    pub const HOST_UNREACHABLE: i32 = 24;
}

/// HTTP 状态码的合法区间（开区间），落入该区间的关闭码视为 HTTP 层拒绝。
pub mod http {
    pub const STATUS_MIN: i32 = 100;
    pub const STATUS_MAX: i32 = 600;
}

/// `LiteCore` 域中表示成功的错误码。
pub const LITECORE_SUCCESS: i32 = 0;

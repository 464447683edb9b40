//! 传输句柄、地址与分帧模式。
//!
//! # 教案式说明
//! - **意图 (Why)**：原生引擎以不透明地址标识一条逻辑连接，托管侧需要一个稳定、可哈希、
//!   可跨线程复制的身份值；这里把裸 `u64` 收敛为 [`TransportHandle`]，杜绝“0 句柄”混入。
//! - **契约 (What)**：句柄值由原生引擎分配，本 crate 从不解引用它，只作为注册表键与日志标签。

use core::fmt;
use core::num::NonZeroU64;

use serde::Deserialize;

/// 一条逻辑连接的不透明身份。
///
/// - **契约 (What)**：数值与原生引擎持有的地址逐位一致；`0` 不是合法句柄；
/// - **日志 (How)**：`Display` 输出 `@0x…`，与原生日志中的 `@%x` 记法对齐，便于跨语言排障。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TransportHandle(NonZeroU64);

impl TransportHandle {
    /// 从原生地址构造句柄；地址为 `0` 时返回 `None`。
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// 原生地址的原始数值。
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0.get())
    }
}

/// 连接的协商分帧模式。
///
/// # 教案式说明
/// - **意图 (Why)**：原生引擎可以自行按 WebSocket 规则成帧，也可以把字节原样交给托管侧；
///   数值与原生头文件中的常量一一对应，跨边界时直接以 `i32` 传递。
/// - **风险 (Trade-offs)**：未知数值通过 [`Framing::from_raw`] 返回 `None`，调用方需显式处理。
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// 以 WebSocket 客户端消息成帧（带掩码）。
    WebSocketClient,
    /// 不成帧，消息原样透传，由托管侧自定义分帧。
    #[default]
    None,
    /// 以 WebSocket 服务端消息成帧（无掩码）。
    WebSocketServer,
}

impl Framing {
    /// 原生侧的数值表示。
    pub fn as_raw(self) -> i32 {
        match self {
            Framing::WebSocketClient => 0,
            Framing::None => 1,
            Framing::WebSocketServer => 2,
        }
    }

    /// 从原生数值解析分帧模式。
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Framing::WebSocketClient),
            1 => Some(Framing::None),
            2 => Some(Framing::WebSocketServer),
            _ => None,
        }
    }
}

/// 连接目标地址，对应原生侧的 `scheme://host:port/path` 四元组。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Address {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Address {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(TransportHandle::from_raw(0).is_none());
        let handle = TransportHandle::from_raw(0xbeef).expect("非零地址必须合法");
        assert_eq!(handle.as_raw(), 0xbeef);
        assert_eq!(handle.to_string(), "@0xbeef");
    }

    #[test]
    fn framing_matches_native_constants() {
        for framing in [
            Framing::WebSocketClient,
            Framing::None,
            Framing::WebSocketServer,
        ] {
            assert_eq!(Framing::from_raw(framing.as_raw()), Some(framing));
        }
        assert_eq!(Framing::from_raw(7), None);
    }

    #[test]
    fn address_renders_as_url() {
        let addr = Address::new("wss", "x.example", 443, "/db/_blipsync");
        assert_eq!(addr.to_string(), "wss://x.example:443/db/_blipsync");
    }
}

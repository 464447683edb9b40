//! 桥接层配置。
//!
//! 宿主可以直接构造 [`BridgeConfig`]，也可以从 TOML 片段加载；缺省字段取默认值，未知字段被拒绝。
//!
//! ```toml
//! max_pending_write_bytes = 1048576
//! default_framing = "web_socket_client"
//! log_payload_sizes = false
//! ```

use serde::Deserialize;

use crate::error::BridgeError;
use crate::handle::Framing;

/// 默认出站背压上限：1 MiB。
pub const DEFAULT_MAX_PENDING_WRITE_BYTES: usize = 1 << 20;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// 单个句柄允许的未确认出站字节上限。
    pub max_pending_write_bytes: usize,
    /// `open_outbound` 未显式指定分帧模式时使用的值。
    pub default_framing: Framing,
    /// 是否在 `debug` 日志中附带每次事件的字节数。
    pub log_payload_sizes: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_pending_write_bytes: DEFAULT_MAX_PENDING_WRITE_BYTES,
            default_framing: Framing::default(),
            log_payload_sizes: false,
        }
    }
}

impl BridgeConfig {
    /// 解析并校验 TOML 配置。
    pub fn from_toml_str(source: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig = toml::from_str(source).map_err(|err| BridgeError::Config {
            detail: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.max_pending_write_bytes == 0 {
            return Err(BridgeError::Config {
                detail: "max_pending_write_bytes must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = BridgeConfig::from_toml_str("").expect("空文档合法");
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.max_pending_write_bytes, 1_048_576);
        assert_eq!(config.default_framing, Framing::None);
    }

    #[test]
    fn fields_are_parsed() {
        let config = BridgeConfig::from_toml_str(
            "max_pending_write_bytes = 4096\ndefault_framing = \"web_socket_client\"\nlog_payload_sizes = true\n",
        )
        .expect("合法配置");
        assert_eq!(config.max_pending_write_bytes, 4096);
        assert_eq!(config.default_framing, Framing::WebSocketClient);
        assert!(config.log_payload_sizes);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let zero = BridgeConfig::from_toml_str("max_pending_write_bytes = 0").expect_err("零上限");
        assert_eq!(zero.code(), "bridge.config.invalid");

        let unknown = BridgeConfig::from_toml_str("max_pending_writes = 1").expect_err("未知字段");
        assert!(matches!(unknown, BridgeError::Config { .. }));

        assert!(BridgeConfig::from_toml_str("default_framing = \"bogus\"").is_err());
    }
}

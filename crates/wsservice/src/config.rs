use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_MAX_CONN_NUM: usize = 3000;
pub const DEFAULT_PENDING_WRITE_NUM: usize = 10000;
pub const DEFAULT_MAX_MSG_LEN: usize = 65535;

/// Configuration for a [`WsService`](crate::WsService).
///
/// Deserializes from the service's config section, e.g.
/// `{"ListenAddr": "0.0.0.0:9000", "MaxConnNum": 5000}`. Keys other than the
/// four below are ignored.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Deserialize)]
pub struct ServiceConfig {
    /// Address the transport listens on. Required.
    #[builder(into)]
    #[serde(rename = "ListenAddr", default)]
    pub listen_addr: String,

    /// Maximum number of connections served at once.
    #[builder(default = DEFAULT_MAX_CONN_NUM)]
    #[serde(rename = "MaxConnNum", default = "default_max_conn_num")]
    pub max_conn_num: usize,

    /// Depth of each connection's outbound queue.
    #[builder(default = DEFAULT_PENDING_WRITE_NUM)]
    #[serde(rename = "PendingWriteNum", default = "default_pending_write_num")]
    pub pending_write_num: usize,

    /// Largest frame accepted or sent, in bytes.
    #[builder(default = DEFAULT_MAX_MSG_LEN)]
    #[serde(rename = "MaxMsgLen", default = "default_max_msg_len")]
    pub max_msg_len: usize,
}

fn default_max_conn_num() -> usize {
    DEFAULT_MAX_CONN_NUM
}

fn default_pending_write_num() -> usize {
    DEFAULT_PENDING_WRITE_NUM
}

fn default_max_msg_len() -> usize {
    DEFAULT_MAX_MSG_LEN
}

impl ServiceConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an already-loaded config section.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::MissingListenAddr);
        }

        for (key, value) in [
            ("MaxConnNum", self.max_conn_num),
            ("PendingWriteNum", self.pending_write_num),
            ("MaxMsgLen", self.max_msg_len),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied() {
        let config = ServiceConfig::from_json(r#"{"ListenAddr": "127.0.0.1:9000"}"#).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.max_conn_num, 3000);
        assert_eq!(config.pending_write_num, 10000);
        assert_eq!(config.max_msg_len, 65535);
    }

    #[test]
    fn test_builder_matches_json_defaults() {
        let built = ServiceConfig::builder().listen_addr("127.0.0.1:9000").build();
        let parsed = ServiceConfig::from_json(r#"{"ListenAddr": "127.0.0.1:9000"}"#).unwrap();

        assert_eq!(built, parsed);
    }

    #[test]
    fn test_overrides_and_unknown_keys() {
        let config = ServiceConfig::from_value(json!({
            "ListenAddr": "0.0.0.0:7000",
            "MaxConnNum": 10,
            "PendingWriteNum": 20,
            "MaxMsgLen": 4096,
            "Name": "gateway",
        }))
        .unwrap();

        assert_eq!(config.max_conn_num, 10);
        assert_eq!(config.pending_write_num, 20);
        assert_eq!(config.max_msg_len, 4096);
    }

    #[test]
    fn test_missing_listen_addr() {
        let result = ServiceConfig::from_value(json!({ "MaxConnNum": 10 }));
        assert!(matches!(result, Err(ConfigError::MissingListenAddr)));

        let result = ServiceConfig::builder().listen_addr("").build().validate();
        assert!(matches!(result, Err(ConfigError::MissingListenAddr)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = ServiceConfig::from_value(json!({
            "ListenAddr": "127.0.0.1:9000",
            "PendingWriteNum": 0,
        }));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "PendingWriteNum",
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_value() {
        let result = ServiceConfig::from_json(r#"{"ListenAddr": 9000}"#);
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }
}

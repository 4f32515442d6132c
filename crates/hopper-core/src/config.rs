//! Broker configuration - 起動時に一度だけ読み込む
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file,
//! then whatever the CLI layer overrides field by field.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HopperError, Result};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8989";
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub listen_addr: String,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub gc_interval_secs: u64,
    /// TTL for results posted by `SetReturn`. Zero keeps them until shutdown.
    pub result_ttl_secs: u64,
    pub tube_retention_secs: u64,
    /// `GetReturn` wait when the caller gives no timeout.
    pub get_return_timeout_secs: u64,
    pub shard_count: usize,
    pub max_frame_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            log_file: None,
            log_level: "info".to_string(),
            gc_interval_secs: 600,
            result_ttl_secs: 600,
            tube_retention_secs: 24 * 60 * 60,
            get_return_timeout_secs: 60,
            shard_count: crate::shard::DEFAULT_SHARD_COUNT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl BrokerConfig {
    /// Defaults, or the TOML file at `path` layered over them.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            HopperError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| HopperError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| HopperError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.shard_count == 0 {
            return Err(HopperError::Config("shard_count must be at least 1".into()));
        }
        if self.gc_interval_secs == 0 {
            return Err(HopperError::Config(
                "gc_interval_secs must be at least 1".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(HopperError::Config(
                "max_frame_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            HopperError::Config(format!("invalid listen_addr {:?}: {e}", self.listen_addr))
        })
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn tube_retention(&self) -> Duration {
        Duration::from_secs(self.tube_retention_secs)
    }

    pub fn get_return_timeout(&self) -> Duration {
        Duration::from_secs(self.get_return_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let cfg = BrokerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:8989");
        assert_eq!(cfg.gc_interval(), Duration::from_secs(600));
        assert_eq!(cfg.result_ttl(), Duration::from_secs(600));
        assert_eq!(cfg.tube_retention(), Duration::from_secs(86_400));
        assert_eq!(cfg.get_return_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.shard_count, 100);
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let cfg = BrokerConfig::from_toml_str(
            r#"
            listen_addr = "0.0.0.0:9000"
            result_ttl_secs = 30
            log_file = "/var/log/hopper.log"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.listen_addr, "0.0.0.0:9000");
        assert_eq!(cfg.result_ttl_secs, 30);
        assert_eq!(cfg.log_file, Some(PathBuf::from("/var/log/hopper.log")));
        assert_eq!(cfg.gc_interval_secs, 600);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = BrokerConfig::from_toml_str("listen = \"x\"").unwrap_err();
        assert!(matches!(err, HopperError::Config(_)));
    }

    #[test]
    fn load_without_path_is_default() {
        assert_eq!(BrokerConfig::load(None).unwrap(), BrokerConfig::default());
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = BrokerConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, HopperError::Config(msg) if msg.contains("not/here.toml")));
    }

    #[rstest]
    #[case::bad_addr(BrokerConfig { listen_addr: "nope".into(), ..BrokerConfig::default() })]
    #[case::no_shards(BrokerConfig { shard_count: 0, ..BrokerConfig::default() })]
    #[case::no_gc(BrokerConfig { gc_interval_secs: 0, ..BrokerConfig::default() })]
    #[case::no_frames(BrokerConfig { max_frame_bytes: 0, ..BrokerConfig::default() })]
    fn validate_rejects(#[case] cfg: BrokerConfig) {
        assert!(matches!(cfg.validate(), Err(HopperError::Config(_))));
    }
}

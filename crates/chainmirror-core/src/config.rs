//! Sync configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainmirror_core::config::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .network("testnet")
//!     .poll_interval_ms(500)
//!     .readiness_max_lag(3)
//!     .build();
//! assert_eq!(config.poll_interval_ms, 500);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::IndexerError;

/// Configuration of a [`SyncDriver`](crate::driver::SyncDriver) and its service loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Network name (e.g. `"mainnet"`), informational.
    pub network: String,
    /// Interval between sync ticks (milliseconds).
    pub poll_interval_ms: u64,
    /// How long `stop()` waits for an in-flight cycle (milliseconds).
    pub stop_timeout_ms: u64,
    /// Readiness fails when the indexed tip trails the node by more than this.
    pub readiness_max_lag: u32,
    /// Symbol of the native token seeded at genesis.
    pub native_token_symbol: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".into(),
            poll_interval_ms: 1000,
            stop_timeout_ms: 30_000,
            readiness_max_lag: 2,
            native_token_symbol: "DFI".into(),
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Parse YAML; missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, IndexerError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, or return defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, IndexerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String, IndexerError> {
        serde_yaml::to_string(self).map_err(|e| IndexerError::Config(e.to_string()))
    }

    /// Reject settings the driver cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.poll_interval_ms == 0 {
            return Err(IndexerError::Config("poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`SyncConfig`].
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn stop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.stop_timeout_ms = ms;
        self
    }

    pub fn readiness_max_lag(mut self, lag: u32) -> Self {
        self.config.readiness_max_lag = lag;
        self
    }

    pub fn native_token_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.config.native_token_symbol = symbol.into();
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = SyncConfig::builder().build();
        assert_eq!(cfg.network, "mainnet");
        assert_eq!(cfg.readiness_max_lag, 2);
        assert_eq!(cfg.stop_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn builder_custom() {
        let cfg = SyncConfig::builder()
            .network("regtest")
            .poll_interval_ms(250)
            .stop_timeout_ms(5_000)
            .native_token_symbol("TKN")
            .build();
        assert_eq!(cfg.network, "regtest");
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.native_token_symbol, "TKN");
    }

    #[test]
    fn yaml_partial_uses_defaults() {
        let cfg = SyncConfig::from_yaml_str("network: testnet\npoll_interval_ms: 200\n").unwrap();
        assert_eq!(cfg.network, "testnet");
        assert_eq!(cfg.poll_interval_ms, 200);
        assert_eq!(cfg.stop_timeout_ms, 30_000);
    }

    #[test]
    fn yaml_roundtrip_and_validation() {
        let cfg = SyncConfig::default();
        let yaml = cfg.to_yaml().unwrap();
        assert_eq!(SyncConfig::from_yaml_str(&yaml).unwrap(), cfg);

        let err = SyncConfig::from_yaml_str("poll_interval_ms: 0").unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = SyncConfig::load(Path::new("/nonexistent/chainmirror.yaml")).unwrap();
        assert_eq!(cfg, SyncConfig::default());
    }
}

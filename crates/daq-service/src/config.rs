//! Service configuration.
//!
//! One explicit struct, resolved once at process start from an optional
//! TOML file plus `DAQ_`-prefixed environment overrides, then passed by
//! value into the runtime. There is no process-wide configuration
//! singleton.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use daq_core::limits::{
    DRAIN_MAX_WAIT, DRAIN_POLL_INTERVAL, DRAIN_STALL_POLLS, LOG_RELAY_PORT_BASE,
    LOG_RELAY_PORT_SPAN,
};
use daq_core::{DaqError, Result};

/// Worker drain tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub stall_polls: u32,
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            poll_interval: DRAIN_POLL_INTERVAL,
            stall_polls: DRAIN_STALL_POLLS,
            max_wait: DRAIN_MAX_WAIT,
        }
    }
}

/// Log-relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRelayConfig {
    pub enabled: bool,
    /// First port of the fixed range the relay binds in.
    pub port_base: u16,
    /// Number of candidate ports.
    pub port_span: u16,
}

impl Default for LogRelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port_base: LOG_RELAY_PORT_BASE,
            port_span: LOG_RELAY_PORT_SPAN,
        }
    }
}

/// Configuration of one service process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, used in log tags and ping replies.
    pub name: String,
    /// Address the control server binds.
    pub bind_host: String,
    /// Pace the mock backend at its nominal sample rate (dry runs feel
    /// like a live rack; tests turn this off).
    pub mock_pacing: bool,
    pub drain: DrainConfig,
    pub log_relay: LogRelayConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "daq".into(),
            bind_host: "0.0.0.0".into(),
            mock_pacing: false,
            drain: DrainConfig::default(),
            log_relay: LogRelayConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Resolve defaults, then the optional TOML file, then `DAQ_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ServiceConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("DAQ_").split("__"))
            .extract()
            .map_err(|e| DaqError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_a_file() {
        let config = ServiceConfig::load(None).unwrap();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert!(config.log_relay.enabled);
        assert_eq!(config.drain.stall_polls, DRAIN_STALL_POLLS);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.toml");
        std::fs::write(
            &path,
            "name = \"rig-a\"\nmock_pacing = true\n[drain]\npoll_interval = \"50ms\"\nstall_polls = 3\nmax_wait = \"10s\"\n",
        )
        .unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.name, "rig-a");
        assert!(config.mock_pacing);
        assert_eq!(config.drain.poll_interval, Duration::from_millis(50));
        assert_eq!(config.drain.max_wait, Duration::from_secs(10));
    }
}

//! Configuration Manager

use super::Config;
use crate::protocol::FRAME_HEADER_LEN;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file, falling back to defaults if
    /// the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            Self::validate(&config).context("Configuration validation failed")?;
            Ok(config)
        } else {
            warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            Self::validate(&config)?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables over defaults.
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(addr) = std::env::var("FRAMELINK_BIND_ADDR") {
            config.network.bind_addr = addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid FRAMELINK_BIND_ADDR: {}", addr))?;
        }
        if let Ok(max) = std::env::var("FRAMELINK_MAX_CONNECTIONS") {
            config.network.max_connections = max
                .parse()
                .with_context(|| format!("Invalid FRAMELINK_MAX_CONNECTIONS: {}", max))?;
        }
        if let Ok(secs) = std::env::var("FRAMELINK_RECV_TIMEOUT_SECS") {
            config.network.recv_timeout = Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("Invalid FRAMELINK_RECV_TIMEOUT_SECS: {}", secs))?,
            );
        }
        if let Ok(len) = std::env::var("FRAMELINK_SEND_QUEUE_LEN") {
            config.network.send_queue_len = len
                .parse()
                .with_context(|| format!("Invalid FRAMELINK_SEND_QUEUE_LEN: {}", len))?;
        }

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a configuration.
    pub fn validate(config: &Config) -> Result<()> {
        let net = &config.network;

        if net.send_queue_len == 0 {
            bail!("network.send_queue_len must be at least 1");
        }
        if net.max_frame_len < FRAME_HEADER_LEN {
            bail!(
                "network.max_frame_len must be at least the header size ({})",
                FRAME_HEADER_LEN
            );
        }
        if net.default_frame_len > net.max_frame_len {
            bail!("network.default_frame_len must not exceed network.max_frame_len");
        }
        if net.max_connections == 0 {
            bail!("network.max_connections must be at least 1");
        }
        if net.recv_timeout.is_zero() {
            warn!(
                "network.recv_timeout is zero; idle connections cannot observe \
                 cancellation and shutdown latency is unbounded"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigManager::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let mut config = Config::default();
        config.network.send_queue_len = 0;
        assert!(ConfigManager::validate(&config).is_err());
    }

    #[test]
    fn test_max_frame_below_header_rejected() {
        let mut config = Config::default();
        config.network.max_frame_len = 8;
        assert!(ConfigManager::validate(&config).is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[network]
bind_addr = "127.0.0.1:9999"
timer_interval = "2s"
recv_timeout = "10s"
send_timeout = "5s"
max_connections = 10
default_frame_len = 1024
max_frame_len = 2048
send_queue_len = 8

[shutdown]
timeout = "3s"
"#
        )
        .unwrap();

        let config = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 9999);
        assert_eq!(config.network.timer_interval, Duration::from_secs(2));
        assert_eq!(config.network.send_queue_len, 8);
        assert_eq!(config.shutdown.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            ConfigManager::load_from_file(Path::new("/nonexistent/framelink.toml")).unwrap();
        assert_eq!(config.network.max_connections, 1000);
    }
}

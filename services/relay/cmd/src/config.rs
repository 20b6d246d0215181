//! Configuration handling for the relay binary.
//!
//! Settings are layered: built-in defaults, then the optional YAML file,
//! then `RELAY_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use relay_server::{ServerConfig, DEFAULT_MAX_CONNECTIONS};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relay service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum simultaneous clients
    pub max_connections: usize,
    /// Largest accepted frame in bytes
    pub max_packet_size: u32,
    /// Statistics log interval (milliseconds)
    pub stats_interval_ms: u64,
    /// Extra write attempts after a short write
    pub write_retry_attempts: u32,
    /// Pause between write attempts (microseconds)
    pub write_retry_delay_us: u64,
    /// Per-client read buffer size in bytes
    pub read_buffer_size: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_packet_size: server.max_packet_size,
            stats_interval_ms: server.stats_interval.as_millis() as u64,
            write_retry_attempts: server.write_retry_attempts,
            write_retry_delay_us: server.write_retry_delay.as_micros() as u64,
            read_buffer_size: server.read_buffer_size,
            log_level: "info".to_string(),
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    relay: Option<RelayConfig>,
}

/// Where the settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// File absent; built-in defaults
    Defaults(PathBuf),
}

/// Environment variables that were applied, as `(name, value)`
pub type Overrides = Vec<(&'static str, String)>;

impl RelayConfig {
    /// Load the YAML file (if present) and apply environment overrides
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<(Self, ConfigSource, Overrides)> {
        let path = config_path.as_ref();
        let (mut config, source) = Self::from_file(path)?;
        let applied = config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok((config, source, applied))
    }

    /// Read the YAML file; a missing file yields defaults
    pub fn from_file(path: &Path) -> Result<(Self, ConfigSource)> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let root: Option<RootConfig> = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let config = root.and_then(|r| r.relay).unwrap_or_default();
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// Apply `RELAY_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<Overrides>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(value) = lookup("RELAY_MAX_CONNECTIONS") {
            self.max_connections = value
                .parse()
                .with_context(|| format!("RELAY_MAX_CONNECTIONS: invalid value {:?}", value))?;
            applied.push(("RELAY_MAX_CONNECTIONS", value));
        }

        if let Some(value) = lookup("RELAY_MAX_PACKET_SIZE") {
            self.max_packet_size = value
                .parse()
                .with_context(|| format!("RELAY_MAX_PACKET_SIZE: invalid value {:?}", value))?;
            applied.push(("RELAY_MAX_PACKET_SIZE", value));
        }

        if let Some(value) = lookup("RELAY_STATS_INTERVAL_MS") {
            self.stats_interval_ms = value
                .parse()
                .with_context(|| format!("RELAY_STATS_INTERVAL_MS: invalid value {:?}", value))?;
            applied.push(("RELAY_STATS_INTERVAL_MS", value));
        }

        if let Some(value) = lookup("RELAY_LOG_LEVEL") {
            self.log_level = value.clone();
            applied.push(("RELAY_LOG_LEVEL", value));
        }

        Ok(applied)
    }

    /// Server settings for listening on `0.0.0.0:port`
    pub fn to_server_config(&self, port: u16) -> ServerConfig {
        ServerConfig {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            max_connections: self.max_connections,
            max_packet_size: self.max_packet_size,
            write_retry_attempts: self.write_retry_attempts,
            write_retry_delay: Duration::from_micros(self.write_retry_delay_us),
            stats_interval: Duration::from_millis(self.stats_interval_ms),
            read_buffer_size: self.read_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.max_packet_size, 1024 * 1024);
        assert_eq!(config.stats_interval_ms, 1000);
        assert_eq!(config.log_level, "info");

        let server = config.to_server_config(9000);
        assert_eq!(server.listen_addr.port(), 9000);
        assert!(server.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
relay:
  max_connections: 16
  max_packet_size: 65535
  stats_interval_ms: 5000
  log_level: debug
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let (config, source) = RelayConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(source, ConfigSource::File(temp_file.path().to_path_buf()));
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.max_packet_size, 65535);
        assert_eq!(config.stats_interval_ms, 5000);
        assert_eq!(config.log_level, "debug");
        // Unset keys keep their defaults.
        assert_eq!(config.write_retry_attempts, 3);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let (config, source) = RelayConfig::from_file(&path).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(source, ConfigSource::Defaults(path));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"relay:\n  max_connections: lots\n")
            .unwrap();
        assert!(RelayConfig::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("RELAY_MAX_CONNECTIONS", "8"),
            ("RELAY_STATS_INTERVAL_MS", "250"),
            ("RELAY_LOG_LEVEL", "warn"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        let applied = config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(applied.len(), 3);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.stats_interval_ms, 250);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.max_packet_size, 1024 * 1024);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = RelayConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "RELAY_MAX_PACKET_SIZE").then(|| "huge".to_string())
        });
        assert!(result.is_err());
    }
}

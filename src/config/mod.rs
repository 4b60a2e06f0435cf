//! Configuration module

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Relay behavior selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    /// Plain CONNECT-style disguise, fresh dial per tunnel
    #[default]
    Connect,
    /// HTTP-style disguise with idle-connection reuse
    Pooled,
    /// WebSocket-style disguise with periodic liveness pings
    KeepAlive,
}

impl ProxyMode {
    /// Destination port assumed when the handshake names a bare host.
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyMode::KeepAlive => 80,
            _ => 22,
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyMode::Connect => "connect",
            ProxyMode::Pooled => "pooled",
            ProxyMode::KeepAlive => "keep-alive",
        })
    }
}

impl TryFrom<&str> for ProxyMode {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "connect" => Ok(ProxyMode::Connect),
            "pooled" => Ok(ProxyMode::Pooled),
            "keepalive" | "keep-alive" => Ok(ProxyMode::KeepAlive),
            _ => Err(Error::config(format!("Unknown proxy mode: {}", s))),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub listen: IpAddr,

    /// Listen port
    pub port: u16,

    /// Relay behavior
    pub mode: ProxyMode,

    /// Shared secret; empty disables authentication
    pub secret: String,

    /// Destination used when the handshake carries no X-Real-Host
    #[serde(rename = "default-host")]
    pub default_host: String,

    /// Buffer sizing
    pub buffer: BufferConfig,

    /// Timeouts
    pub timeouts: TimeoutConfig,

    /// Idle-connection pool (pooled mode only)
    pub pool: PoolConfig,
}

impl Config {
    /// Load configuration from file (synchronous)
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from file (async)
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Load from string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.buffer.min == 0 {
            return Err(Error::config("buffer.min must be at least 1"));
        }
        if self.buffer.min > self.buffer.max {
            return Err(Error::config("buffer.min exceeds buffer.max"));
        }
        if self.buffer.initial < self.buffer.min || self.buffer.initial > self.buffer.max {
            return Err(Error::config(
                "buffer.initial must lie within [buffer.min, buffer.max]",
            ));
        }
        if self.buffer.handshake == 0 {
            return Err(Error::config("buffer.handshake must be at least 1"));
        }
        if self.mode == ProxyMode::Pooled && self.pool.max_idle == 0 {
            return Err(Error::config("pool.max-idle must be at least 1 in pooled mode"));
        }
        Ok(())
    }

    /// Socket address to bind
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }

    /// Fallback destination for handshakes without X-Real-Host
    pub fn default_destination(&self) -> Option<String> {
        if self.default_host.is_empty() {
            None
        } else {
            Some(self.default_host.clone())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            mode: ProxyMode::default(),
            secret: String::new(),
            default_host: "0.0.0.0:22".to_string(),
            buffer: BufferConfig::default(),
            timeouts: TimeoutConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// Buffer sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Handshake read size (bytes)
    pub handshake: usize,

    /// Initial relay chunk size (bytes)
    pub initial: usize,

    /// Lower bound for the adaptive chunk size (bytes)
    pub min: usize,

    /// Upper bound for the adaptive chunk size (bytes)
    pub max: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            handshake: 65536,
            initial: 4096,
            min: 1024,
            max: 65536,
        }
    }
}

/// Timeout configuration (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Handshake read deadline
    pub handshake: u64,

    /// Relay read-inactivity deadline
    pub idle: u64,

    /// Liveness ping period (keep-alive mode)
    pub keepalive: u64,

    /// Drain window granted to live tunnels at shutdown
    pub grace: u64,
}

impl TimeoutConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            handshake: 10,
            idle: 60,
            keepalive: 30,
            grace: 30,
        }
    }
}

/// Idle-connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections kept per destination
    #[serde(rename = "max-idle")]
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { max_idle: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 80);
        assert_eq!(config.mode, ProxyMode::Connect);
        assert!(config.secret.is_empty());
        assert_eq!(config.default_host, "0.0.0.0:22");
        assert_eq!(config.buffer.handshake, 65536);
        assert_eq!(config.timeouts.idle, 60);
        assert_eq!(config.pool.max_idle, 100);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
listen: 127.0.0.1
port: 8080
mode: keep-alive
secret: hunter2
default-host: 127.0.0.1:22
buffer:
  handshake: 16384
timeouts:
  keepalive: 15
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.mode, ProxyMode::KeepAlive);
        assert_eq!(config.secret, "hunter2");
        assert_eq!(config.buffer.handshake, 16384);
        // untouched fields keep their defaults
        assert_eq!(config.buffer.initial, 4096);
        assert_eq!(config.timeouts.keepalive, 15);
        assert_eq!(config.timeouts.idle, 60);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(ProxyMode::try_from("connect").unwrap(), ProxyMode::Connect);
        assert_eq!(ProxyMode::try_from("POOLED").unwrap(), ProxyMode::Pooled);
        assert_eq!(ProxyMode::try_from("keep-alive").unwrap(), ProxyMode::KeepAlive);
        assert_eq!(ProxyMode::try_from("keepalive").unwrap(), ProxyMode::KeepAlive);
        assert!(ProxyMode::try_from("socks5").is_err());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(ProxyMode::Connect.default_port(), 22);
        assert_eq!(ProxyMode::Pooled.default_port(), 22);
        assert_eq!(ProxyMode::KeepAlive.default_port(), 80);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = Config::default();
        config.buffer.min = 8192;
        config.buffer.max = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_default_host_means_no_fallback() {
        let mut config = Config::default();
        config.default_host.clear();
        assert!(config.default_destination().is_none());
    }
}

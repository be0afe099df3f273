//! Server configuration from command-line flags and environment variables.

use clap::Parser;
use shared::WireFormat;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::game::DEFAULT_NOTIFICATION_CAPACITY;
use crate::history::DEFAULT_HISTORY_CAPACITY;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address both sockets bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port of the heartbeat listener
    #[arg(long, env = "TCP_PORT", default_value_t = 8080)]
    pub tcp_port: u16,

    /// Port of the session socket
    #[arg(long, env = "UDP_PORT", default_value_t = 8081)]
    pub udp_port: u16,

    /// Snapshots kept for resend requests
    #[arg(long, env = "HISTORY_CAPACITY", default_value_t = DEFAULT_HISTORY_CAPACITY)]
    pub history_capacity: usize,

    /// Interval between heartbeat pings in milliseconds
    #[arg(long, env = "HEARTBEAT_MS", default_value_t = 1000)]
    pub heartbeat_ms: u64,

    /// Size of the state notification queue
    #[arg(long, env = "NOTIFICATION_CAPACITY", default_value_t = DEFAULT_NOTIFICATION_CAPACITY)]
    pub notification_capacity: usize,

    /// Encoding on both sockets: json or bincode
    #[arg(long, env = "WIRE_FORMAT", default_value = "json")]
    pub wire_format: WireFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid host '{0}'")]
    InvalidHost(String),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("tcp and udp port are both {0}")]
    PortClash(u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            tcp_port: 8080,
            udp_port: 8081,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            heartbeat_ms: 1000,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            wire_format: WireFormat::Json,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loopback config on ephemeral ports.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: 0,
            udp_port: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ip()?;
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero("history capacity"));
        }
        if self.heartbeat_ms == 0 {
            return Err(ConfigError::Zero("heartbeat interval"));
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Zero("notification capacity"));
        }
        // Port 0 picks an ephemeral port per socket, so equal zeros are fine.
        if self.tcp_port == self.udp_port && self.tcp_port != 0 {
            return Err(ConfigError::PortClash(self.tcp_port));
        }
        Ok(())
    }

    pub fn ip(&self) -> Result<IpAddr, ConfigError> {
        self.host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))
    }

    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

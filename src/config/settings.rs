use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tcp: TcpConfig,
    #[serde(default)]
    pub udp: UdpConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP listener (REST triggers and the `/ws` upgrade endpoint)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Push-stream (newline-delimited JSON over TCP)
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    /// Deadline for writing one frame to one client, in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

/// Subscribe/notify (UDP datagrams)
#[derive(Debug, Clone, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_udp_port")]
    pub port: u16,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
    /// Subscriber expiry in seconds; 0 keeps subscribers until UNSUBSCRIBE
    #[serde(default)]
    pub subscriber_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Interactive chat hub
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Interval between server pings, must be shorter than `read_timeout_secs`
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Connection is dropped when nothing arrives within this window
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Deliver chat messages back to their author as well
    #[serde(default)]
    pub echo_to_sender: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_tcp_port() -> u16 {
    9090
}

fn default_udp_port() -> u16 {
    7070
}

fn default_write_timeout() -> u64 {
    10
}

fn default_max_datagram_size() -> usize {
    2048
}

fn default_sweep_interval() -> u64 {
    60 // 1 minute
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    54
}

fn default_read_timeout() -> u64 {
    60
}

fn default_bridge_capacity() -> usize {
    100
}

impl Settings {
    /// Load defaults, `config/` files and `FANOUT_*` environment variables,
    /// then validate.
    pub fn new() -> Result<Self, AppError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("tcp.port", 9090)?
            .set_default("udp.port", 7070)?
            .set_default("bridge.capacity", 100)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // FANOUT_SERVER__PORT, FANOUT_UDP__SUBSCRIBER_TTL_SECS, FANOUT_API__KEY, ...
            .add_source(
                Environment::with_prefix("FANOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.capacity == 0 {
            return Err(ConfigError::Message(
                "bridge.capacity must be greater than zero".into(),
            ));
        }
        if self.websocket.outbound_buffer == 0 {
            return Err(ConfigError::Message(
                "websocket.outbound_buffer must be greater than zero".into(),
            ));
        }
        if self.udp.max_datagram_size == 0 {
            return Err(ConfigError::Message(
                "udp.max_datagram_size must be greater than zero".into(),
            ));
        }
        if self.udp.subscriber_ttl_secs > 0 && self.udp.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "udp.sweep_interval_secs must be greater than zero when udp.subscriber_ttl_secs is set".into(),
            ));
        }
        for (key, secs) in [
            ("tcp.write_timeout_secs", self.tcp.write_timeout_secs),
            ("websocket.ping_interval_secs", self.websocket.ping_interval_secs),
            ("websocket.read_timeout_secs", self.websocket.read_timeout_secs),
            ("websocket.write_timeout_secs", self.websocket.write_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Message(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }
        if self.websocket.ping_interval_secs >= self.websocket.read_timeout_secs {
            return Err(ConfigError::Message(format!(
                "websocket.ping_interval_secs ({}) must be shorter than websocket.read_timeout_secs ({})",
                self.websocket.ping_interval_secs, self.websocket.read_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl TcpConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl UdpConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn subscriber_ttl(&self) -> Option<Duration> {
        (self.subscriber_ttl_secs > 0).then(|| Duration::from_secs(self.subscriber_ttl_secs))
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_tcp_port(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_udp_port(),
            max_datagram_size: default_max_datagram_size(),
            subscriber_ttl_secs: 0,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            ping_interval_secs: default_ping_interval(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            echo_to_sender: false,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: default_bridge_capacity(),
        }
    }
}

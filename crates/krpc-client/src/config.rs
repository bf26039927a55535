use krpc_common::{KrpcError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default port of the RPC connection.
pub const DEFAULT_RPC_PORT: u16 = 50000;
/// Default port of the stream connection.
pub const DEFAULT_STREAM_PORT: u16 = 50001;

/// Client connection settings.
///
/// Every field has a default, so a config file or environment only needs to
/// name what it changes.
///
/// # Default Configuration
///
/// - `name`: `""` (the server picks a display name)
/// - `host`: `127.0.0.1`
/// - `rpc_port`: 50000
/// - `stream_port`: 50001
/// - `connect_timeout_ms`: 5000
/// - `call_timeout_ms`: none, calls wait for their response
///
/// # Example
///
/// ```rust
/// use krpc_client::ClientConfig;
///
/// let config = ClientConfig::from_json_str(r#"{"name": "autopilot", "rpc_port": 51000}"#).unwrap();
/// assert_eq!(config.rpc_port, 51000);
/// assert_eq!(config.stream_port, 50001);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name shown for this client in the server UI (up to 32 bytes of UTF-8)
    pub name: String,
    /// Server host name or IP address
    pub host: String,
    /// Port of the RPC (call) connection
    pub rpc_port: u16,
    /// Port of the stream connection
    pub stream_port: u16,
    /// Timeout for establishing each TCP connection
    pub connect_timeout_ms: u64,
    /// Timeout for a single call, including waiting for its response
    ///
    /// A call that times out leaves a partial response on the socket, so the
    /// RPC connection is dropped when this fires.
    pub call_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: DEFAULT_HOST.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            connect_timeout_ms: 5000,
            call_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Creates a default configuration with the given client name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KrpcError::Config(e.to_string()))
    }

    /// Builds a configuration from `KRPC_*` environment variables.
    ///
    /// Reads `KRPC_CLIENT_NAME`, `KRPC_HOST`, `KRPC_RPC_PORT`,
    /// `KRPC_STREAM_PORT` and `KRPC_CALL_TIMEOUT_MS`; unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(name) = lookup("KRPC_CLIENT_NAME") {
            config.name = name;
        }
        if let Some(host) = lookup("KRPC_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("KRPC_RPC_PORT") {
            config.rpc_port = parse_var("KRPC_RPC_PORT", &port)?;
        }
        if let Some(port) = lookup("KRPC_STREAM_PORT") {
            config.stream_port = parse_var("KRPC_STREAM_PORT", &port)?;
        }
        if let Some(timeout) = lookup("KRPC_CALL_TIMEOUT_MS") {
            config.call_timeout_ms = Some(parse_var("KRPC_CALL_TIMEOUT_MS", &timeout)?);
        }
        Ok(config)
    }

    pub fn rpc_address(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }

    pub fn stream_address(&self) -> String {
        format!("{}:{}", self.host, self.stream_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| KrpcError::Config(format!("{}={:?}: {}", key, raw, e)))
}

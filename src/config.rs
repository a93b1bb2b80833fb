use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

/// Maximum number of simultaneously served connections (admission limit)
pub const MAX_CONNECTIONS: usize = 5;

/// Pending connections the kernel queues on the listening socket
pub const CONNECTION_QUEUE: i32 = 100;

/// Maximum length of a display name, login token or channel name
pub const MAX_NAME_LEN: usize = 20;

/// Maximum length of a peer address in string form (`255.255.255.255:65535`)
pub const MAX_IP_LEN: usize = 21;

/// Capacity of the per-connection receive buffer
pub const RECEIVER_BUFFER_LEN: usize = 16;

/// The only header version this server speaks
pub const PROTOCOL_VERSION: u8 = 1;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IPv4 bind address
    pub bind_addr: String,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Path to FeOx data file (None for memory-only)
    pub data_path: Option<String>,

    /// Maximum memory for the FeOx store
    pub max_memory: Option<usize>,

    /// File size for persistent storage (in bytes)
    /// Only used when data_path is set
    pub file_size: Option<u64>,

    /// TCP nodelay on accepted connections
    pub tcp_nodelay: bool,

    /// Longest a single socket read or write may block, in milliseconds.
    /// This bounds each call, not the whole exchange: a peer that keeps
    /// trickling bytes inside the limit is not cut off. None blocks
    /// indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_timeout_ms: Option<u64>,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 9000,
            data_path: None,
            max_memory: Some(256 * 1024 * 1024), // 256MB
            file_size: Some(1024 * 1024 * 1024), // 1GB when persistent
            tcp_nodelay: true,
            exchange_timeout_ms: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use parley_server::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("parley.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.parse::<Ipv4Addr>().is_err() {
            anyhow::bail!("bind_addr must be an IPv4 address, got '{}'", self.bind_addr);
        }

        if self.exchange_timeout_ms == Some(0) {
            anyhow::bail!("exchange_timeout_ms must be > 0");
        }

        Ok(())
    }

    /// Assemble the listen address from `bind_addr` and `port`
    pub fn listen_addr(&self) -> crate::Result<SocketAddrV4> {
        let ip = self.bind_addr.parse::<Ipv4Addr>().map_err(|e| {
            crate::Error::Config(format!("invalid bind address '{}': {}", self.bind_addr, e))
        })?;
        Ok(SocketAddrV4::new(ip, self.port))
    }

    /// Per-call read and write timeout applied to every accepted connection
    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_ms.map(Duration::from_millis)
    }
}

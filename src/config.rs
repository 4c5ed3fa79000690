use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::bloomfilter::MAX_WIRE_BITS;

/// Default address the inbound router listens on
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:5454";
/// Flat delay between startup connection attempts, in seconds
pub const DEFAULT_CONNECT_RETRY_SECS: u64 = 60;
/// Largest accepted request or response line: the worst-case encoding of the
/// largest bloom filter, one symbol per bit, plus room for the JSON envelope
pub const DEFAULT_MAX_FRAME_BYTES: usize = MAX_WIRE_BITS + 64 * 1024;

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Base nodes only accept inbound connections
    pub base_node: bool,
    /// Primary peers to connect to at startup, in slot order
    pub remote_peers: Vec<String>,
    /// Failover peers, heartbeated at the slower cadence
    pub backup_peers: Vec<String>,
    /// Primary peer heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
    /// Backup heartbeat and bloom filter sync interval in seconds
    pub heartbeat_loop: u64,
    /// Address the inbound router binds to
    pub listen_address: String,
    /// Number of slots in each peer set
    pub max_peers: usize,
    /// Delay between startup connection attempts in seconds
    pub connect_retry_secs: u64,
    /// Timeout for a single request to a peer in milliseconds
    pub request_timeout_ms: u64,
    /// Number of bits in the advertised bloom filter
    pub bloom_filter_bits: usize,
    /// Number of hash functions in the advertised bloom filter
    pub bloom_filter_hashes: u32,
    /// Longest line read from a connection, excluding the newline
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_node: false,
            remote_peers: Vec::new(),
            backup_peers: Vec::new(),
            heartbeat_interval: 1000,
            heartbeat_loop: 5,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            max_peers: 16,
            connect_retry_secs: DEFAULT_CONNECT_RETRY_SECS,
            request_timeout_ms: 2000,
            bloom_filter_bits: 1024,
            bloom_filter_hashes: 3,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl Config {
    /// Creates a configuration for a base node listening on `listen_address`
    pub fn base_node(listen_address: impl Into<String>) -> Self {
        Self {
            base_node: true,
            listen_address: listen_address.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file, filling missing fields with defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn cycle_duration(&self) -> Duration {
        Duration::from_secs(self.heartbeat_loop)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

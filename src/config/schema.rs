//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML and every
//! field has a default, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Listening prefix and endpoint options.
    pub server: ServerConfig,

    /// Per-connection timeouts and buffer limits.
    pub connection: ConnectionConfig,

    /// Session registry behavior.
    pub websocket: WebSocketConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Prefix the server listens on, e.g. `http://*:8080/`.
    pub url: String,

    /// Set `SO_REUSEADDR` on the listening socket.
    pub reuse_address: bool,

    /// Folder searched for `{port}.cer` / `{port}.key` pairs.
    /// Defaults to the platform data directory.
    pub certificate_folder: Option<PathBuf>,

    /// Explicit server certificate used when no per-port pair exists.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections per endpoint.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://*:8080/".to_string(),
            reuse_address: false,
            certificate_folder: None,
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// Explicit certificate material (PEM).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the certificate chain.
    pub cert_path: PathBuf,

    /// Path to the private key.
    pub key_path: PathBuf,
}

/// Connection engine limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Inactivity timeout before the first request.
    pub first_request_timeout_secs: u64,

    /// Inactivity timeout between keep-alive requests.
    pub reuse_timeout_secs: u64,

    /// Size of the fixed read buffer.
    pub buffer_length: usize,

    /// Cap on request line plus header bytes.
    pub max_input_length: usize,

    /// Requests served on one connection before it is closed.
    pub max_reuses: u32,

    /// Bound on writing an error page to a peer that may not be reading.
    pub write_timeout_secs: u64,
}

impl ConnectionConfig {
    pub fn first_request_timeout(&self) -> Duration {
        Duration::from_secs(self.first_request_timeout_secs)
    }

    pub fn reuse_timeout(&self) -> Duration {
        Duration::from_secs(self.reuse_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            first_request_timeout_secs: 90,
            reuse_timeout_secs: 15,
            buffer_length: 8192,
            max_input_length: 32_768,
            max_reuses: 100,
            write_timeout_secs: 5,
        }
    }
}

/// Session registry settings applied to every WebSocket service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Periodically remove sessions that stop answering pings.
    pub keep_clean: bool,

    /// How long a ping waits for its pong.
    pub wait_time_ms: u64,

    /// Interval between sweeps.
    pub sweep_interval_secs: u64,

    /// Largest frame payload accepted from a peer.
    pub max_payload_length: u64,
}

impl WebSocketConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            keep_clean: true,
            wait_time_ms: 1000,
            sweep_interval_secs: 60,
            max_payload_length: 64 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Scrape endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "ws_engine=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

// ── Runtime connection configuration ──
//
// Describes *where* Teslemetry lives and how to talk to it. Never touches
// disk: the CLI builds a `ConnectionConfig` from the config crate and hands
// it in.

use std::time::Duration;

use teslemetry_api::{OAuthEndpoints, TransportConfig};

pub const DEFAULT_API_URL: &str = "https://api.teslemetry.com";

/// Configuration for the connection controller and device drivers.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// REST API root (e.g. `https://api.teslemetry.com`).
    pub api_url: String,
    /// Root the SSE stream hangs off; `/sse` is appended.
    pub stream_url: String,
    pub oauth: OAuthEndpoints,
    /// Request timeout for REST and grant calls.
    pub timeout: Duration,
    /// How often devices poll `site_info` / `live_status`.
    pub poll_interval: Duration,
    /// Open the SSE telemetry stream for each connection epoch.
    pub streaming: bool,
    /// Installation name sent with grant requests.
    pub device_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            stream_url: DEFAULT_API_URL.into(),
            oauth: OAuthEndpoints::default(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            streaming: true,
            device_name: None,
        }
    }
}

impl ConnectionConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout,
            ..TransportConfig::default()
        }
    }
}

// Shared transport configuration for building reqwest::Client instances.
//
// The grant client, the REST client and the SSE stream all share timeout
// and user-agent settings through this module.

use std::time::Duration;

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Whole-request timeout for REST and token calls. Not applied to the
    /// SSE stream, which stays open indefinitely.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("teslemetry-bridge/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for request/response traffic.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(crate::error::Error::Transport)
    }

    /// Build a `reqwest::Client` for long-lived streaming responses.
    ///
    /// Only the connect phase is bounded; the body may stay open forever.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(crate::error::Error::Transport)
    }
}

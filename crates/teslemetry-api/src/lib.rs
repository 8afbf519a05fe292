//! Async client for the Teslemetry cloud API.
//!
//! Three surfaces, all sharing [`TransportConfig`]:
//!
//! - [`oauth`]: the OAuth2 token endpoint (authorization-code and refresh
//!   grants). Error bodies are classified once into [`GrantErrorKind`].
//! - [`client`]: bearer-authenticated REST calls under `/api/1/`. The token
//!   comes from a [`TokenSource`] on every request.
//! - [`stream`]: the SSE telemetry stream with reconnect and backoff.

pub mod client;
pub mod error;
pub mod oauth;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::{TeslemetryClient, TokenSource};
pub use error::{Error, GrantErrorKind};
pub use oauth::{GrantClient, GrantRequest, OAuthEndpoints, TokenResponse};
pub use stream::{ReconnectConfig, StreamHandle, TelemetryEvent};
pub use transport::TransportConfig;

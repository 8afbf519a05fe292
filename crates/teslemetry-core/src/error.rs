// ── Core error types ──
//
// Domain errors from teslemetry-core. Consumers never see HTTP status codes
// or raw grant bodies directly: the `From<teslemetry_api::Error>` impl
// translates transport-layer errors into these variants. `Clone` so that a
// single-flight result can be handed to every joined caller.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Credential errors ────────────────────────────────────────────
    #[error("No OAuth2 token available -- authorization required")]
    NoToken,

    #[error("No refresh token available -- authorization required")]
    NoRefreshToken,

    #[error("Authorization code rejected ({code}): {description}")]
    AuthExchange { code: String, description: String },

    #[error("Token endpoint error ({code}): {description}")]
    AuthServer { code: String, description: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Teslemetry is not configured -- run `teslemetry auth login`")]
    NotConfigured,

    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request to Teslemetry timed out")]
    Timeout,

    // ── Capability errors ────────────────────────────────────────────
    #[error("Capability not found: {capability}")]
    CapabilityNotFound { capability: String },

    #[error("Write to {capability} rejected: {reason}")]
    WriteRejected { capability: String, reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Command rejected by Teslemetry: {message}")]
    Rejected { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Storage / configuration errors ───────────────────────────────
    #[error("Token storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` when the user has to (re)authorize to recover.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::NoToken
                | Self::NoRefreshToken
                | Self::AuthExchange { .. }
                | Self::AuthServer { .. }
                | Self::AuthenticationFailed { .. }
                | Self::NotConfigured
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<teslemetry_api::Error> for CoreError {
    fn from(err: teslemetry_api::Error) -> Self {
        match err {
            teslemetry_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            teslemetry_api::Error::Grant {
                code, description, ..
            } => CoreError::AuthServer { code, description },
            teslemetry_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            teslemetry_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            teslemetry_api::Error::RateLimited { retry_after_secs } => CoreError::Api {
                message: format!("Rate limited -- retry after {retry_after_secs}s"),
                code: Some("rate_limited".into()),
                status: Some(429),
            },
            teslemetry_api::Error::Api {
                status: 404,
                message,
                ..
            } => CoreError::NotFound {
                entity_type: "Resource".into(),
                identifier: message,
            },
            teslemetry_api::Error::Api {
                message,
                code,
                status,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            teslemetry_api::Error::Stream(reason) => CoreError::ConnectionFailed {
                url: "telemetry stream".into(),
                reason,
            },
            teslemetry_api::Error::Deserialization { message, body: _ } => CoreError::Api {
                message: format!("Unexpected response: {message}"),
                code: None,
                status: None,
            },
        }
    }
}

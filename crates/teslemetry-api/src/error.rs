use thiserror::Error;

/// Top-level error type for the `teslemetry-api` crate.
///
/// Covers every failure mode across the API surfaces this crate talks to:
/// the OAuth2 token endpoint, the REST API, and the SSE telemetry stream.
/// `teslemetry-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The REST API rejected the bearer token, or no token could be produced.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The token endpoint answered with an RFC 6749 error body.
    #[error("Token grant rejected ({code}): {description}")]
    Grant {
        kind: GrantErrorKind,
        code: String,
        description: String,
        status: u16,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── REST API ────────────────────────────────────────────────────
    /// Rate limited by the API. Includes retry-after in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Structured error from the REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: u16,
    },

    // ── Stream ──────────────────────────────────────────────────────
    /// SSE stream could not be opened or broke mid-read.
    #[error("Telemetry stream failed: {0}")]
    Stream(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

/// Classification of an OAuth2 error code returned by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantErrorKind {
    /// `invalid_refresh_token`: the refresh token is dead, stored credentials must go.
    InvalidRefreshToken,
    /// `invalid_token`: the access token was rejected, one refresh may recover.
    InvalidToken,
    /// Any other RFC 6749 code (`invalid_grant`, `invalid_client`, ...).
    Other,
}

impl GrantErrorKind {
    pub fn classify(code: &str) -> Self {
        match code {
            "invalid_refresh_token" => Self::InvalidRefreshToken,
            "invalid_token" => Self::InvalidToken,
            _ => Self::Other,
        }
    }
}

impl Error {
    /// Returns `true` if the bearer token was rejected and a fresh
    /// authorization might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::Grant {
                    kind: GrantErrorKind::InvalidRefreshToken | GrantErrorKind::InvalidToken,
                    ..
                }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } | Self::Stream(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Extract the API error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            Self::Grant { code, .. } => Some(code),
            _ => None,
        }
    }
}

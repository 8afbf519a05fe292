//! CLI error type with miette diagnostics and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use teslemetry_config::ConfigError;
use teslemetry_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authorization ────────────────────────────────────────────────

    #[error("Not authorized with Teslemetry")]
    #[diagnostic(
        code(teslemetry::not_authorized),
        help("Authorize this installation with: teslemetry auth login")
    )]
    NotAuthorized,

    #[error("Authorization failed ({code}): {description}")]
    #[diagnostic(
        code(teslemetry::auth_failed),
        help("The stored token was discarded. Run: teslemetry auth login")
    )]
    AuthFailed { code: String, description: String },

    #[error("Redirect state does not match this login attempt")]
    #[diagnostic(
        code(teslemetry::state_mismatch),
        help("Start over with: teslemetry auth login")
    )]
    StateMismatch,

    // ── Connection ───────────────────────────────────────────────────

    #[error("Cannot reach {url}: {reason}")]
    #[diagnostic(
        code(teslemetry::connection_failed),
        help("Check network connectivity and the api_url in your config.")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request to Teslemetry timed out")]
    #[diagnostic(
        code(teslemetry::timeout),
        help("Increase timeout_secs in the config or retry later.")
    )]
    Timeout,

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(teslemetry::not_found),
        help("List what the account owns with: teslemetry products")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("Operation not supported: {operation}")]
    #[diagnostic(code(teslemetry::unsupported))]
    Unsupported { operation: String },

    // ── Remote failures ──────────────────────────────────────────────

    #[error("Teslemetry rejected the command: {message}")]
    #[diagnostic(code(teslemetry::rejected))]
    Rejected { message: String },

    #[error("API error: {message}")]
    #[diagnostic(code(teslemetry::api))]
    Api {
        message: String,
        code: Option<String>,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(teslemetry::validation))]
    Validation { field: String, reason: String },

    // ── Configuration / storage ──────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(teslemetry::config),
        help("Inspect the effective configuration with: teslemetry config show")
    )]
    Config(#[from] ConfigError),

    #[error("Token storage failed: {message}")]
    #[diagnostic(code(teslemetry::storage))]
    Storage { message: String },

    #[error("Internal error: {0}")]
    #[diagnostic(code(teslemetry::internal))]
    Internal(String),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotAuthorized | Self::AuthFailed { .. } | Self::StateMismatch => exit_code::AUTH,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoToken | CoreError::NoRefreshToken | CoreError::NotConfigured => {
                CliError::NotAuthorized
            }

            CoreError::AuthExchange { code, description }
            | CoreError::AuthServer { code, description } => {
                CliError::AuthFailed { code, description }
            }

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                code: "unauthorized".into(),
                description: message,
            },

            CoreError::ConnectionFailed { url, reason } => {
                CliError::ConnectionFailed { url, reason }
            }

            CoreError::Timeout => CliError::Timeout,

            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                resource_type: entity_type,
                identifier,
            },

            CoreError::CapabilityNotFound { capability } => CliError::NotFound {
                resource_type: "Capability".into(),
                identifier: capability,
            },

            CoreError::Unsupported { operation } => CliError::Unsupported { operation },

            CoreError::WriteRejected { capability, reason } => CliError::Validation {
                field: capability,
                reason,
            },

            CoreError::Rejected { message } => CliError::Rejected { message },

            CoreError::Api { message, code, .. } => CliError::Api { message, code },

            CoreError::Storage { message } | CoreError::Config { message } => {
                CliError::Storage { message }
            }

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

/// Map a dialoguer failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

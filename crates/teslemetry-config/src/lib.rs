//! Configuration for the Teslemetry bridge.
//!
//! A TOML file at the platform config path, layered under `TESLEMETRY_`
//! environment variables, plus the persistent settings store that keeps the
//! OAuth2 token record. Translates to `teslemetry_core::ConnectionConfig`.

pub mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use teslemetry_api::OAuthEndpoints;
use teslemetry_api::oauth::{
    DEFAULT_AUTHORIZE_URL, DEFAULT_CLIENT_ID, DEFAULT_REDIRECT_URI, DEFAULT_TOKEN_URL,
};
use teslemetry_core::ConnectionConfig;
use teslemetry_core::config::DEFAULT_API_URL;

pub use store::{FileTokenStore, KeyringTokenStore, SettingsStore, open_token_store};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthSettings,

    /// REST API root.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// SSE stream root; falls back to `api_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,

    /// Installation name sent with grant requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Open the SSE telemetry stream.
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Where the OAuth2 token record lives.
    #[serde(default)]
    pub token_store: TokenStoreKind,

    /// Settings file for the `file` token store. Defaults to the platform
    /// data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oauth: OAuthSettings::default(),
            api_url: default_api_url(),
            stream_url: None,
            device_name: None,
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            streaming: default_streaming(),
            token_store: TokenStoreKind::default(),
            settings_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OAuthSettings {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// JSON settings file.
    #[default]
    File,
    /// System keyring.
    Keyring,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_streaming() -> bool {
    true
}
fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.into()
}
fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.into()
}
fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.into()
}
fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "teslemetry", "teslemetry")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("teslemetry");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the JSON settings file.
pub fn settings_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("settings.json"),
        |dirs| dirs.data_dir().join("settings.json"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then the TOML file at `path` (if present), then
/// `TESLEMETRY_*` variables (`__` separates nested keys).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TESLEMETRY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    value.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL `{value}`: {e}"),
    })
}

impl Config {
    pub fn oauth_endpoints(&self) -> Result<OAuthEndpoints, ConfigError> {
        if self.oauth.client_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "oauth.client_id".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(OAuthEndpoints {
            client_id: self.oauth.client_id.clone(),
            authorize_url: parse_url("oauth.authorize_url", &self.oauth.authorize_url)?,
            token_url: parse_url("oauth.token_url", &self.oauth.token_url)?,
            redirect_uri: self.oauth.redirect_uri.clone(),
        })
    }

    /// Build the core connection config, validating every URL.
    pub fn to_connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        parse_url("api_url", &self.api_url)?;
        let stream_url = self.stream_url.clone().unwrap_or_else(|| self.api_url.clone());
        parse_url("stream_url", &stream_url)?;

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "poll_interval_secs".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(ConnectionConfig {
            api_url: self.api_url.clone(),
            stream_url,
            oauth: self.oauth_endpoints()?,
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            streaming: self.streaming,
            device_name: self.device_name.clone(),
        })
    }

    /// Settings file used by the `file` token store.
    pub fn resolved_settings_path(&self) -> PathBuf {
        self.settings_path.clone().unwrap_or_else(settings_path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.api_url, "https://api.teslemetry.com");
        assert_eq!(config.oauth.client_id, "homey");
        assert_eq!(config.token_store, TokenStoreKind::File);
        assert!(config.streaming);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                device_name = "Garage hub"
                poll_interval_secs = 60
                token_store = "keyring"

                [oauth]
                client_id = "my-client"
            "#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();

        assert_eq!(config.device_name.as_deref(), Some("Garage hub"));
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.token_store, TokenStoreKind::Keyring);
        assert_eq!(config.oauth.client_id, "my-client");
        assert_eq!(config.oauth.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            stream_url: Some("https://stream.example.com".into()),
            streaming: false,
            ..Config::default()
        };

        save_config_to(&config, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn connection_config_falls_back_to_api_url_for_stream() {
        let connection = Config::default().to_connection_config().unwrap();
        assert_eq!(connection.stream_url, connection.api_url);
        assert_eq!(connection.poll_interval, Duration::from_secs(30));
        assert_eq!(connection.oauth.redirect_uri, DEFAULT_REDIRECT_URI);
    }

    #[test]
    fn invalid_token_url_is_reported_by_field() {
        let config = Config {
            oauth: OAuthSettings {
                token_url: "not a url".into(),
                ..OAuthSettings::default()
            },
            ..Config::default()
        };

        let err = config.to_connection_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "oauth.token_url"));
    }
}

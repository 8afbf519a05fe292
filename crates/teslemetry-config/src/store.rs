// ── Persistent settings ──
//
// `SettingsStore` is a flat JSON object on disk, one value per key. The
// token record lives under `TOKEN_SETTINGS_KEY`, either in that file or in
// the system keyring.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use teslemetry_core::auth::TOKEN_SETTINGS_KEY;
use teslemetry_core::{CoreError, Token, TokenStore};

use crate::{Config, ConfigError, TokenStoreKind};

const KEYRING_SERVICE: &str = "teslemetry";

fn storage_error(err: ConfigError) -> CoreError {
    CoreError::Storage {
        message: err.to_string(),
    }
}

// ── SettingsStore ───────────────────────────────────────────────────

/// JSON key-value file. Writes replace the file atomically.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the key is absent or the file does not exist.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        match all.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_owned(), serde_json::to_value(value)?);
        self.write_all(&all).await
    }

    pub async fn unset(&self, key: &str) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        if all.remove(key).is_some() {
            self.write_all(&all).await?;
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<Map<String, Value>, ConfigError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, all: &Map<String, Value>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(all)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "settings written");
        Ok(())
    }
}

// ── FileTokenStore ──────────────────────────────────────────────────

/// Token record kept in the settings file.
#[derive(Debug)]
pub struct FileTokenStore {
    settings: SettingsStore,
}

impl FileTokenStore {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Token>, CoreError> {
        match self.settings.get::<Token>(TOKEN_SETTINGS_KEY).await {
            Ok(token) => Ok(token),
            // An unreadable record means re-authorizing, not a dead process.
            Err(ConfigError::Json(e)) => {
                warn!(error = %e, "stored OAuth2 token is unreadable, ignoring it");
                Ok(None)
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn save(&self, token: &Token) -> Result<(), CoreError> {
        self.settings
            .set(TOKEN_SETTINGS_KEY, token)
            .await
            .map_err(storage_error)
    }

    async fn clear(&self) -> Result<(), CoreError> {
        self.settings
            .unset(TOKEN_SETTINGS_KEY)
            .await
            .map_err(storage_error)
    }
}

// ── KeyringTokenStore ───────────────────────────────────────────────

/// Token record kept in the system keyring as a JSON string.
pub struct KeyringTokenStore {
    entry: keyring::Entry,
}

impl KeyringTokenStore {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            entry: keyring::Entry::new(KEYRING_SERVICE, TOKEN_SETTINGS_KEY)?,
        })
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn load(&self) -> Result<Option<Token>, CoreError> {
        let raw = match self.entry.get_password() {
            Ok(raw) => raw,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(storage_error(e.into())),
        };
        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(error = %e, "keyring OAuth2 token is unreadable, ignoring it");
                Ok(None)
            }
        }
    }

    async fn save(&self, token: &Token) -> Result<(), CoreError> {
        let raw = serde_json::to_string(token).map_err(|e| storage_error(e.into()))?;
        self.entry
            .set_password(&raw)
            .map_err(|e| storage_error(e.into()))
    }

    async fn clear(&self) -> Result<(), CoreError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(storage_error(e.into())),
        }
    }
}

/// Token store selected by `config.token_store`.
pub fn open_token_store(config: &Config) -> Result<Arc<dyn TokenStore>, ConfigError> {
    Ok(match config.token_store {
        TokenStoreKind::File => Arc::new(FileTokenStore::new(SettingsStore::new(
            config.resolved_settings_path(),
        ))),
        TokenStoreKind::Keyring => Arc::new(KeyringTokenStore::new()?),
    })
}

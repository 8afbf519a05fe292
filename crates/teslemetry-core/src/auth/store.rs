use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::token::Token;
use crate::error::CoreError;

/// Settings key the token record is persisted under.
pub const TOKEN_SETTINGS_KEY: &str = "teslemetry_oauth2_token";

/// Durable home of the single token record.
///
/// Implementations: [`MemoryTokenStore`] here, file- and keyring-backed
/// stores in `teslemetry-config`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Token>, CoreError>;
    async fn save(&self, token: &Token) -> Result<(), CoreError>;
    async fn clear(&self) -> Result<(), CoreError>;
}

/// Non-persistent store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            slot: Mutex::new(Some(token)),
        }
    }

    /// Current persisted record.
    pub fn snapshot(&self) -> Option<Token> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Token>, CoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, token: &Token) -> Result<(), CoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CoreError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

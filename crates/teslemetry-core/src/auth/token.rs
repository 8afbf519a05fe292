use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use teslemetry_api::TokenResponse;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// The persisted OAuth2 token record.
///
/// `expires_at` is computed locally at save time; the server only sends a
/// relative `expires_in`. The tokens are plain strings so the record
/// serializes as-is; `Debug` redacts them and [`bearer`](Self::bearer) hands
/// the access token out as a `SecretString`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Token {
    pub fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_in = resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let lifetime = i64::try_from(expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type.unwrap_or_else(default_token_type),
            expires_in,
            expires_at: now
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True when the token expires within [`REFRESH_MARGIN_SECS`] of `now`.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        let margin = TimeDelta::seconds(REFRESH_MARGIN_SECS);
        now.checked_add_signed(margin)
            .is_none_or(|deadline| deadline > self.expires_at)
    }

    pub fn bearer(&self) -> SecretString {
        SecretString::from(self.access_token.as_str())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

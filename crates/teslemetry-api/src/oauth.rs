// OAuth2 grant client for the Teslemetry token endpoint.
//
// Performs exactly one HTTP call per `request()`. Deduplication, persistence
// and the refresh policy live in `teslemetry-core`; this module only speaks
// the wire format and classifies RFC 6749 error bodies.

use std::fmt;

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, GrantErrorKind};
use crate::transport::TransportConfig;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://teslemetry.com/connect";
pub const DEFAULT_TOKEN_URL: &str = "https://api.teslemetry.com/oauth/token";
pub const DEFAULT_REDIRECT_URI: &str = "https://callback.athom.com/oauth2/callback";
pub const DEFAULT_CLIENT_ID: &str = "homey";

// ── Endpoints ────────────────────────────────────────────────────────

/// Where and as whom the OAuth2 flow runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub client_id: String,
    pub authorize_url: Url,
    pub token_url: Url,
    pub redirect_uri: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.into(),
            authorize_url: Url::parse(DEFAULT_AUTHORIZE_URL).expect("valid default authorize URL"),
            token_url: Url::parse(DEFAULT_TOKEN_URL).expect("valid default token URL"),
            redirect_uri: DEFAULT_REDIRECT_URI.into(),
        }
    }
}

impl OAuthEndpoints {
    /// Build the URL the user opens to grant access.
    ///
    /// Pure string construction; no network.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url
    }
}

// ── Wire types ───────────────────────────────────────────────────────

/// Body of a token-endpoint POST.
#[derive(Clone, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum GrantRequest {
    AuthorizationCode {
        client_id: String,
        code: String,
        code_verifier: String,
        redirect_uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    RefreshToken {
        client_id: String,
        refresh_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl GrantRequest {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    pub fn is_authorization_code(&self) -> bool {
        matches!(self, Self::AuthorizationCode { .. })
    }
}

impl fmt::Debug for GrantRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantRequest")
            .field("grant_type", &self.grant_type())
            .finish_non_exhaustive()
    }
}

/// Successful token-endpoint response.
///
/// `expires_in` and `token_type` are optional on the wire; callers apply
/// their own defaults.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct GrantErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Stateless client for the token endpoint.
#[derive(Debug, Clone)]
pub struct GrantClient {
    http: reqwest::Client,
    endpoints: OAuthEndpoints,
}

impl GrantClient {
    pub fn new(endpoints: OAuthEndpoints, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, endpoints })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(endpoints: OAuthEndpoints, http: reqwest::Client) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// POST one grant request. Never retries.
    pub async fn request(&self, grant: &GrantRequest) -> Result<TokenResponse, Error> {
        let url = self.endpoints.token_url.clone();
        debug!(grant_type = grant.grant_type(), "POST {url}");

        let resp = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(grant)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(classify_grant_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("invalid token response: {e}"),
            body,
        })
    }
}

/// Turn a non-2xx token-endpoint response into [`Error::Grant`].
///
/// Bodies that are not RFC 6749 JSON still produce a `Grant` error, keyed
/// `http_<status>` with the raw body as description.
fn classify_grant_error(status: u16, body: &str) -> Error {
    let parsed: GrantErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error.unwrap_or_else(|| format!("http_{status}"));
    let description = parsed
        .error_description
        .unwrap_or_else(|| body.trim().to_owned());

    Error::Grant {
        kind: GrantErrorKind::classify(&code),
        code,
        description,
        status,
    }
}

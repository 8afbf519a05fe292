// ── OAuth2 token lifecycle ──
//
// One TokenManager per installation. It owns the in-memory token, persists
// every change through a `TokenStore`, and hands out bearer tokens to any
// number of concurrent callers.
//
// At most one grant call (code exchange or refresh) is in flight at a time.
// The in-flight call is a `Shared` future parked in `in_flight`; everyone who
// arrives while it runs awaits the same result. The future clears the slot
// itself once it settles, so the next caller starts fresh.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use secrecy::SecretString;
use teslemetry_api::{GrantClient, GrantErrorKind, GrantRequest, OAuthEndpoints, TokenSource};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{self, PkceChallenge};
use super::store::TokenStore;
use super::token::Token;
use crate::error::CoreError;

const EVENT_CHANNEL_CAPACITY: usize = 16;

type GrantFuture = Shared<BoxFuture<'static, Result<Token, CoreError>>>;

/// Credential change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    /// A new token was obtained and persisted.
    Saved,
    /// Credentials were removed.
    Cleared,
}

/// Cheaply cloneable handle to the installation's token state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenManagerInner>,
}

struct TokenManagerInner {
    grants: GrantClient,
    store: Arc<dyn TokenStore>,
    device_name: Option<String>,
    token: ArcSwapOption<Token>,
    in_flight: Mutex<Option<GrantFuture>>,
    events: broadcast::Sender<TokenEvent>,
}

impl TokenManager {
    // ── Construction ─────────────────────────────────────────────────

    /// Build a manager seeded from whatever the store holds.
    pub async fn load(
        grants: GrantClient,
        store: Arc<dyn TokenStore>,
        device_name: Option<String>,
    ) -> Result<Self, CoreError> {
        let token = store.load().await?;
        if let Some(ref token) = token {
            debug!(expires_at = %token.expires_at, "loaded persisted OAuth2 token");
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(TokenManagerInner {
                grants,
                store,
                device_name,
                token: ArcSwapOption::new(token.map(Arc::new)),
                in_flight: Mutex::new(None),
                events,
            }),
        })
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        self.inner.grants.endpoints()
    }

    /// Subscribe to [`TokenEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    /// The current token record, if any. Never triggers a refresh.
    pub fn current_token(&self) -> Option<Arc<Token>> {
        self.inner.token.load_full()
    }

    // ── Authorization flow ───────────────────────────────────────────

    pub fn generate_pkce(&self) -> PkceChallenge {
        pkce::generate()
    }

    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        self.endpoints().authorization_url(state, code_challenge)
    }

    /// Trade an authorization code for a token.
    ///
    /// Joins an in-flight grant instead of starting a second one.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<Token, CoreError> {
        let grant = {
            let mut slot = self.inner.lock_in_flight();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let endpoints = self.endpoints();
                    let request = GrantRequest::AuthorizationCode {
                        client_id: endpoints.client_id.clone(),
                        code: code.to_owned(),
                        code_verifier: code_verifier.to_owned(),
                        redirect_uri: endpoints.redirect_uri.clone(),
                        name: self.inner.device_name.clone(),
                    };
                    TokenManagerInner::install(&self.inner, &mut slot, request)
                }
            }
        };
        grant.await
    }

    // ── Token access ─────────────────────────────────────────────────

    /// Refresh using the stored refresh token.
    pub async fn refresh_token(&self) -> Result<Token, CoreError> {
        let grant = {
            let mut slot = self.inner.lock_in_flight();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let request = self.inner.refresh_request()?;
                    TokenManagerInner::install(&self.inner, &mut slot, request)
                }
            }
        };
        grant.await
    }

    /// A bearer token valid for at least the refresh margin.
    pub async fn access_token(&self) -> Result<SecretString, CoreError> {
        let seen = self.inner.token.load_full().ok_or(CoreError::NoToken)?;
        if !seen.needs_refresh_at(Utc::now()) {
            return Ok(seen.bearer());
        }

        let grant = {
            let mut slot = self.inner.lock_in_flight();
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                // Someone may have refreshed between our read and taking the guard.
                if let Some(current) = self.inner.token.load_full() {
                    if current.access_token != seen.access_token
                        && !current.needs_refresh_at(Utc::now())
                    {
                        return Ok(current.bearer());
                    }
                }
                info!("OAuth2 token expiring soon, refreshing");
                let request = self.inner.refresh_request()?;
                TokenManagerInner::install(&self.inner, &mut slot, request)
            }
        };
        Ok(grant.await?.bearer())
    }

    /// `true` if a token exists and has not expired. No side effects.
    pub fn has_valid_token(&self) -> bool {
        self.inner
            .token
            .load()
            .as_ref()
            .is_some_and(|t| t.is_valid_at(Utc::now()))
    }

    /// Forget the token in memory and in the store.
    pub async fn clear_token(&self) -> Result<(), CoreError> {
        self.inner.clear().await
    }
}

impl TokenManagerInner {
    fn lock_in_flight(&self) -> MutexGuard<'_, Option<GrantFuture>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park a new grant in the (held, empty) slot and return a handle to it.
    ///
    /// The future is lazy: nothing runs until the caller awaits it after
    /// releasing the guard.
    fn install(
        this: &Arc<Self>,
        slot: &mut Option<GrantFuture>,
        request: GrantRequest,
    ) -> GrantFuture {
        debug!(grant_type = request.grant_type(), "starting token grant");
        let inner = Arc::clone(this);
        let grant = async move {
            let outcome = inner.perform(request).await;
            inner.lock_in_flight().take();
            outcome
        }
        .boxed()
        .shared();

        *slot = Some(grant.clone());
        grant
    }

    fn refresh_request(&self) -> Result<GrantRequest, CoreError> {
        let refresh_token = self
            .token
            .load()
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or(CoreError::NoRefreshToken)?;

        Ok(GrantRequest::RefreshToken {
            client_id: self.grants.endpoints().client_id.clone(),
            refresh_token,
            name: self.device_name.clone(),
        })
    }

    /// Run one grant, plus at most one inline refresh on `invalid_token`.
    async fn perform(&self, mut request: GrantRequest) -> Result<Token, CoreError> {
        let mut retried = false;
        loop {
            let err = match self.grants.request(&request).await {
                Ok(resp) => {
                    let token = Token::from_response(resp, Utc::now());
                    self.save(token.clone()).await;
                    return Ok(token);
                }
                Err(err) => err,
            };

            let teslemetry_api::Error::Grant {
                kind,
                code,
                description,
                ..
            } = err
            else {
                return Err(err.into());
            };

            match kind {
                GrantErrorKind::InvalidRefreshToken => {
                    warn!(code = %code, "refresh token rejected, clearing stored credentials");
                    if let Err(e) = self.clear().await {
                        warn!(error = %e, "failed to remove stored credentials");
                    }
                    return Err(CoreError::AuthServer { code, description });
                }
                GrantErrorKind::InvalidToken if !retried => {
                    let Ok(refresh) = self.refresh_request() else {
                        return Err(CoreError::AuthServer { code, description });
                    };
                    info!("token reported invalid, attempting a single refresh");
                    request = refresh;
                    retried = true;
                }
                _ if request.is_authorization_code() => {
                    return Err(CoreError::AuthExchange { code, description });
                }
                _ => return Err(CoreError::AuthServer { code, description }),
            }
        }
    }

    /// Install `token` in memory, persist it, then notify.
    ///
    /// A persistence failure is logged; the fresh token stays usable for
    /// this process.
    async fn save(&self, token: Token) {
        let token = Arc::new(token);
        self.token.store(Some(Arc::clone(&token)));
        if let Err(e) = self.store.save(&token).await {
            warn!(error = %e, "failed to persist OAuth2 token");
        }
        debug!(expires_at = %token.expires_at, "OAuth2 token saved");
        let _ = self.events.send(TokenEvent::Saved);
    }

    async fn clear(&self) -> Result<(), CoreError> {
        warn!("removing OAuth2 credentials");
        self.token.store(None);
        let _ = self.events.send(TokenEvent::Cleared);
        self.store.clear().await
    }
}

// ── Bridge to the REST client ────────────────────────────────────────

#[async_trait]
impl TokenSource for TokenManager {
    async fn access_token(&self) -> Result<SecretString, teslemetry_api::Error> {
        TokenManager::access_token(self)
            .await
            .map_err(|e| teslemetry_api::Error::Authentication {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use teslemetry_api::TransportConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::store::MemoryTokenStore;

    fn token(access: &str, refresh: Option<&str>, expires_in_secs: i64) -> Token {
        Token {
            access_token: access.into(),
            refresh_token: refresh.map(Into::into),
            token_type: "Bearer".into(),
            expires_in: 3600,
            expires_at: Utc::now() + TimeDelta::seconds(expires_in_secs),
        }
    }

    async fn manager(server: &MockServer, store: Arc<MemoryTokenStore>) -> TokenManager {
        let endpoints = OAuthEndpoints {
            token_url: Url::parse(&format!("{}/oauth/token", server.uri())).unwrap(),
            ..OAuthEndpoints::default()
        };
        let grants = GrantClient::new(endpoints, &TransportConfig::default()).unwrap();
        TokenManager::load(grants, store, None).await.unwrap()
    }

    #[tokio::test]
    async fn has_valid_token_reflects_expiry_without_network() {
        let server = MockServer::start().await;

        let store = Arc::new(MemoryTokenStore::with_token(token("A", Some("r"), -1)));
        assert!(!manager(&server, store).await.has_valid_token());

        let store = Arc::new(MemoryTokenStore::with_token(token("A", Some("r"), 61)));
        let tokens = manager(&server, store).await;
        assert!(tokens.has_valid_token());
        assert_eq!(tokens.access_token().await.unwrap().expose_secret(), "A");
    }

    #[tokio::test]
    async fn access_token_without_token_is_no_token() {
        let server = MockServer::start().await;
        let tokens = manager(&server, Arc::new(MemoryTokenStore::new())).await;
        assert!(matches!(tokens.access_token().await, Err(CoreError::NoToken)));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_fast() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::with_token(token("A", None, 10)));
        let tokens = manager(&server, store).await;

        assert!(matches!(
            tokens.refresh_token().await,
            Err(CoreError::NoRefreshToken)
        ));
        assert!(matches!(
            tokens.access_token().await,
            Err(CoreError::NoRefreshToken)
        ));
    }

    #[tokio::test]
    async fn invalid_token_retries_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_token",
                "error_description": "token invalid"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(token("A", Some("r1"), 10)));
        let tokens = manager(&server, store).await;

        let err = tokens.refresh_token().await.unwrap_err();
        assert!(matches!(err, CoreError::AuthServer { ref code, .. } if code == "invalid_token"));
    }

    #[tokio::test]
    async fn rejected_code_is_auth_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_partial_json(json!({"grant_type": "authorization_code"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = manager(&server, Arc::new(MemoryTokenStore::new())).await;
        let err = tokens.exchange_code("abc", "v1").await.unwrap_err();

        assert!(
            matches!(err, CoreError::AuthExchange { ref code, ref description } if code == "invalid_grant" && description == "code expired")
        );
        assert!(!tokens.has_valid_token());
    }

    #[tokio::test]
    async fn save_and_clear_emit_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A",
                "refresh_token": "r"
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let tokens = manager(&server, Arc::clone(&store)).await;
        let mut events = tokens.subscribe();

        tokens.exchange_code("abc", "v1").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TokenEvent::Saved);
        assert!(store.snapshot().is_some());

        tokens.clear_token().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TokenEvent::Cleared);
        assert!(store.snapshot().is_none());
        assert!(tokens.current_token().is_none());
    }
}

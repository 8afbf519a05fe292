// Integration tests for `TokenManager` against a mocked token endpoint.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use teslemetry_api::{GrantClient, OAuthEndpoints, TransportConfig};
use teslemetry_core::{CoreError, MemoryTokenStore, Token, TokenManager};

// ── Helpers ─────────────────────────────────────────────────────────

fn token(access: &str, refresh: &str, expires_in_secs: i64) -> Token {
    Token {
        access_token: access.into(),
        refresh_token: Some(refresh.into()),
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
    TokenManager::load(grants, store, Some("Living room hub".into()))
        .await
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({
            "grant_type": "refresh_token",
            "refresh_token": "r1",
            "client_id": "homey",
            "name": "Living room hub"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "B",
                    "refresh_token": "r2",
                    "expires_in": 3600
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Inside the refresh margin.
    let store = Arc::new(MemoryTokenStore::with_token(token("A", "r1", 10)));
    let tokens = manager(&server, Arc::clone(&store)).await;

    let results = join_all((0..8).map(|_| {
        let tokens = tokens.clone();
        async move { tokens.access_token().await }
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap().expose_secret(), "B");
    }
    let persisted = store.snapshot().unwrap();
    assert_eq!(persisted.access_token, "B");
    assert_eq!(persisted.refresh_token.as_deref(), Some("r2"));
}

#[tokio::test]
async fn invalid_refresh_token_clears_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_refresh_token",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(token("A", "r1", 10)));
    let tokens = manager(&server, Arc::clone(&store)).await;

    let err = tokens.access_token().await.unwrap_err();

    assert!(matches!(err, CoreError::AuthServer { ref code, .. } if code == "invalid_refresh_token"));
    assert!(err.is_credential_error());
    assert!(!tokens.has_valid_token());
    assert!(tokens.current_token().is_none());
    assert!(store.snapshot().is_none());
}

#[tokio::test]
async fn exchanged_token_is_served_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "code": "abc",
            "code_verifier": "v1",
            "redirect_uri": "https://callback.athom.com/oauth2/callback"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A",
            "refresh_token": "r",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({ "grant_type": "refresh_token" })))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let tokens = manager(&server, Arc::clone(&store)).await;

    let token = tokens.exchange_code("abc", "v1").await.unwrap();
    assert_eq!(token.access_token, "A");
    assert_eq!(token.expires_in, 3600);

    assert_eq!(tokens.access_token().await.unwrap().expose_secret(), "A");
    assert!(tokens.has_valid_token());
    assert_eq!(store.snapshot().unwrap().access_token, "A");
}

#[tokio::test]
async fn missing_expiry_defaults_to_an_hour() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A"
        })))
        .mount(&server)
        .await;

    let tokens = manager(&server, Arc::new(MemoryTokenStore::new())).await;
    let before = Utc::now();
    let token = tokens.exchange_code("abc", "v1").await.unwrap();

    assert_eq!(token.expires_in, 3600);
    assert!(token.expires_at >= before + TimeDelta::seconds(3600));
    assert!(token.refresh_token.is_none());
}

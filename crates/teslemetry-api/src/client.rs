// Async HTTP client for the Teslemetry REST API.
//
// Base path: /api/1/
// Auth: bearer token pulled from a `TokenSource` on every request, so a
// refresh performed elsewhere is picked up without rebuilding the client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::stream::{ReconnectConfig, StreamHandle};
use crate::transport::TransportConfig;
use crate::types::{self, Envelope};

// ── Token source ─────────────────────────────────────────────────────

/// Supplies a currently valid bearer token.
///
/// Implemented by the token manager in `teslemetry-core`; the client never
/// caches what it gets back.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, Error>;
}

// ── Error response shape ─────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the Teslemetry REST API.
pub struct TeslemetryClient {
    http: reqwest::Client,
    base_url: Url,
    transport: TransportConfig,
    tokens: Arc<dyn TokenSource>,
}

impl TeslemetryClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn new(
        base_url: &str,
        transport: &TransportConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            transport: transport.clone(),
            tokens,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(
        base_url: &str,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            transport: TransportConfig::default(),
            tokens,
        })
    }

    /// Ensure the base URL ends with `/` so relative joins keep its path.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn bearer(&self) -> Result<SecretString, Error> {
        self.tokens.access_token().await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.get_raw::<Envelope<T>>(path)
            .await
            .map(|envelope| envelope.response)
    }

    /// GET a body that is not wrapped in `{ "response": ... }`.
    async fn get_raw<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let token = self.bearer().await?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let token = self.bearer().await?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await?;
        Self::handle_response::<Envelope<T>>(resp)
            .await
            .map(|envelope| envelope.response)
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str::<T>(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Error::RateLimited { retry_after_secs };
        }

        let raw = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorResponse>(&raw).ok();

        let message = parsed
            .as_ref()
            .and_then(|e| e.error_description.clone().or_else(|| e.error.clone()))
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    status.to_string()
                } else {
                    raw.clone()
                }
            });

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Error::Authentication { message };
        }

        Error::Api {
            status: status.as_u16(),
            message,
            code: parsed.and_then(|e| e.error),
        }
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    // ── Products ─────────────────────────────────────────────────────

    pub async fn products(&self) -> Result<Vec<types::Product>, Error> {
        self.get("api/1/products").await
    }

    /// Per-product access flags. Not enveloped.
    pub async fn metadata(&self) -> Result<types::Metadata, Error> {
        self.get_raw("api/1/metadata").await
    }

    // ── Energy sites ─────────────────────────────────────────────────

    pub async fn site_info(&self, site_id: u64) -> Result<types::SiteInfo, Error> {
        self.get(&format!("api/1/energy_sites/{site_id}/site_info"))
            .await
    }

    pub async fn live_status(&self, site_id: u64) -> Result<types::LiveStatus, Error> {
        self.get(&format!("api/1/energy_sites/{site_id}/live_status"))
            .await
    }

    /// Wall Connector charge sessions of the site.
    pub async fn charge_history(&self, site_id: u64) -> Result<types::ChargeHistory, Error> {
        self.get(&format!(
            "api/1/energy_sites/{site_id}/telemetry_history?kind=charge"
        ))
        .await
    }

    pub async fn set_backup_reserve(
        &self,
        site_id: u64,
        percent: u8,
    ) -> Result<types::CommandResponse, Error> {
        self.post(
            &format!("api/1/energy_sites/{site_id}/backup"),
            &json!({ "backup_reserve_percent": percent }),
        )
        .await
    }

    pub async fn set_operation_mode(
        &self,
        site_id: u64,
        mode: &str,
    ) -> Result<types::CommandResponse, Error> {
        self.post(
            &format!("api/1/energy_sites/{site_id}/operation"),
            &json!({ "default_real_mode": mode }),
        )
        .await
    }

    pub async fn set_storm_mode(
        &self,
        site_id: u64,
        enabled: bool,
    ) -> Result<types::CommandResponse, Error> {
        self.post(
            &format!("api/1/energy_sites/{site_id}/storm_mode"),
            &json!({ "enabled": enabled }),
        )
        .await
    }

    /// Update the export rule and/or the grid-charging restriction.
    ///
    /// `None` fields are left out of the body and keep their current value.
    pub async fn grid_import_export(
        &self,
        site_id: u64,
        export_rule: Option<&str>,
        disallow_charge_from_grid_with_solar_installed: Option<bool>,
    ) -> Result<types::CommandResponse, Error> {
        let mut body = serde_json::Map::new();
        if let Some(rule) = export_rule {
            body.insert("customer_preferred_export_rule".into(), rule.into());
        }
        if let Some(disallow) = disallow_charge_from_grid_with_solar_installed {
            body.insert(
                "disallow_charge_from_grid_with_solar_installed".into(),
                disallow.into(),
            );
        }
        self.post(
            &format!("api/1/energy_sites/{site_id}/grid_import_export"),
            &body,
        )
        .await
    }

    // ── Vehicles ─────────────────────────────────────────────────────

    pub async fn vehicle_command(
        &self,
        vin: &str,
        command: &str,
        body: &serde_json::Value,
    ) -> Result<types::CommandResponse, Error> {
        self.post(&format!("api/1/vehicles/{vin}/command/{command}"), body)
            .await
    }

    pub async fn wake_up(&self, vin: &str) -> Result<types::CommandResponse, Error> {
        self.post(&format!("api/1/vehicles/{vin}/wake_up"), &json!({}))
            .await
    }

    // ── Telemetry stream ─────────────────────────────────────────────

    /// Open the SSE telemetry stream at `{stream_url}/sse`.
    ///
    /// Uses a dedicated HTTP client without a whole-request timeout and the
    /// same token source as REST calls.
    pub fn open_stream(
        &self,
        stream_url: &str,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, Error> {
        let url = Self::normalize_base_url(stream_url)?.join("sse")?;
        let http = self.transport.build_stream_client()?;
        Ok(StreamHandle::open(
            url,
            http,
            Arc::clone(&self.tokens),
            reconnect,
            cancel,
        ))
    }
}

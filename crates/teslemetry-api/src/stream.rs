//! Server-Sent Events telemetry stream with auto-reconnect.
//!
//! Opens `GET {stream_url}/sse` with the current bearer token and broadcasts
//! each `data:` payload as a [`TelemetryEvent`] through a
//! [`tokio::sync::broadcast`] channel. Reconnects with exponential backoff
//! and jitter, fetching a fresh token on every attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use teslemetry_api::stream::ReconnectConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! let handle = client.open_stream("https://api.teslemetry.com", ReconnectConfig::default(), CancellationToken::new())?;
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {:?}", event.vin, event.data);
//! }
//!
//! handle.close();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::TokenSource;
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── TelemetryEvent ───────────────────────────────────────────────────

/// One telemetry payload for a single vehicle.
///
/// `data` holds only the signals that changed; consumers apply it as a
/// partial update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub vin: String,

    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,

    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

// ── StreamHandle ─────────────────────────────────────────────────────

/// Handle to a running telemetry stream.
///
/// Call [`close`](Self::close) to tear down the background task.
#[derive(Debug)]
pub struct StreamHandle {
    event_tx: broadcast::Sender<Arc<TelemetryEvent>>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Spawn the reconnection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously.
    pub fn open(
        url: Url,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_tx = event_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            stream_loop(url, http, tokens, task_tx, reconnect, task_cancel).await;
        });

        Self { event_tx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// If a consumer falls behind, it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetryEvent>> {
        self.event_tx.subscribe()
    }

    /// Signal the background task to shut down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn stream_loop(
    url: Url,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    event_tx: broadcast::Sender<Arc<TelemetryEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &http, tokens.as_ref(), &event_tx, &cancel) => result,
        };

        match result {
            // Server ended the response; reconnect immediately.
            Ok(()) => {
                if cancel.is_cancelled() {
                    break;
                }
                tracing::info!("telemetry stream ended, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "telemetry stream error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "telemetry stream reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "waiting before reconnect"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }

    tracing::debug!("telemetry stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    url: &Url,
    http: &reqwest::Client,
    tokens: &dyn TokenSource,
    event_tx: &broadcast::Sender<Arc<TelemetryEvent>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to telemetry stream");

    let token = tokens.access_token().await?;
    let resp = http
        .get(url.clone())
        .bearer_auth(token.expose_secret())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Stream(format!("HTTP {status}")));
    }

    tracing::info!("telemetry stream connected");

    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::default();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for payload in decoder.push(&bytes) {
                        parse_and_broadcast(&payload, event_tx);
                    }
                }
                Some(Err(e)) => return Err(Error::Stream(e.to_string())),
                None => return Ok(()),
            }
        }
    }
}

// ── SSE framing ──────────────────────────────────────────────────────

/// Incremental decoder for the `text/event-stream` format.
///
/// Buffers raw bytes so multi-byte characters split across chunks survive.
/// Only `data:` fields are kept; `event:`, `id:`, `retry:` and comments are
/// dropped.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every event payload it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut completed = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    completed.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_owned());
            }
        }
        completed
    }
}

// ── Payload parsing ──────────────────────────────────────────────────

fn parse_and_broadcast(payload: &str, event_tx: &broadcast::Sender<Arc<TelemetryEvent>>) {
    match serde_json::from_str::<TelemetryEvent>(payload) {
        Ok(event) => {
            // No subscribers is fine.
            let _ = event_tx.send(Arc::new(event));
        }
        Err(e) => {
            tracing::debug!(error = %e, "ignoring non-telemetry stream payload");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max)` scaled by +-25% jitter seeded
/// from the attempt number.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(32)).unwrap_or(32);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────

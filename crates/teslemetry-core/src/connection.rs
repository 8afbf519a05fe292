// ── Connection lifecycle ──
//
// Owns the single shared Teslemetry client. A "connection epoch" is one
// client + product catalog (products joined with account metadata) +
// (optional) telemetry stream, built from a valid token and torn down when
// credentials change. At most one epoch exists.
//
// `initialize` is serialized by the epoch mutex, so concurrent lazy accessors
// never build two clients. `reinitialize` is single-flight: a second caller
// awaits the cycle already running. The token listener applies one
// credential event at a time.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use strum::Display;
use teslemetry_api::stream::TelemetryEvent;
use teslemetry_api::{ReconnectConfig, StreamHandle, TeslemetryClient, TokenSource};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{TokenEvent, TokenManager};
use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::model::Catalog;

type SharedCycle = Shared<BoxFuture<'static, ()>>;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Unauthenticated,
    Initializing,
    Ready,
}

// ── Epoch ────────────────────────────────────────────────────────

struct Epoch {
    client: Arc<TeslemetryClient>,
    catalog: Arc<Catalog>,
    stream: Option<StreamHandle>,
}

impl Epoch {
    fn close(self) {
        if let Some(stream) = self.stream {
            stream.close();
        }
    }
}

// ── ConnectionController ─────────────────────────────────────────

/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ConnectionConfig,
    tokens: TokenManager,
    epoch: Mutex<Option<Epoch>>,
    reinit: StdMutex<Option<SharedCycle>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionController {
    /// Create a controller. Does NOT connect: call [`start`](Self::start)
    /// and/or [`initialize`](Self::initialize).
    pub fn new(config: ConnectionConfig, tokens: TokenManager) -> Self {
        let (state, _) = watch::channel(ConnectionState::Unauthenticated);
        Self {
            inner: Arc::new(ControllerInner {
                config,
                tokens,
                epoch: Mutex::new(None),
                reinit: StdMutex::new(None),
                state,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    // ── Background tasks ─────────────────────────────────────────

    /// Spawn the token listener and build the first epoch.
    pub async fn start(&self) {
        let events = self.inner.tokens.subscribe();
        let listener = tokio::spawn(token_listener(
            self.clone(),
            events,
            self.inner.cancel.clone(),
        ));
        self.inner.task_handles.lock().await.push(listener);

        self.initialize().await;
    }

    /// Stop background tasks and tear down the live epoch.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.teardown().await;
        debug!("connection controller shut down");
    }

    // ── Epoch lifecycle ──────────────────────────────────────────

    /// Build an epoch if none exists and a valid token is present.
    ///
    /// Failures are logged and leave the controller uninitialized.
    pub async fn initialize(&self) {
        let mut epoch = self.inner.epoch.lock().await;
        self.inner.build_into(&mut epoch).await;
    }

    /// Tear down the live epoch (if any) and build a fresh one.
    ///
    /// Concurrent callers share one cycle.
    pub async fn reinitialize(&self) {
        let cycle = {
            let mut slot = self.inner.lock_reinit();
            if let Some(existing) = slot.as_ref() {
                debug!("joining in-progress reinitialize");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let cycle = async move {
                    {
                        let mut epoch = inner.epoch.lock().await;
                        if let Some(old) = epoch.take() {
                            old.close();
                            debug!("previous connection epoch torn down");
                        }
                        inner.build_into(&mut epoch).await;
                    }
                    inner.lock_reinit().take();
                }
                .boxed()
                .shared();
                *slot = Some(cycle.clone());
                cycle
            }
        };
        cycle.await;
    }

    /// Drop the live epoch and report `Unauthenticated`.
    pub async fn teardown(&self) {
        if let Some(old) = self.inner.epoch.lock().await.take() {
            old.close();
            info!("Teslemetry connection torn down");
        }
        self.inner.set_state(ConnectionState::Unauthenticated);
    }

    // ── Accessors ────────────────────────────────────────────────

    /// The live client, lazily initializing first.
    pub async fn client(&self) -> Option<Arc<TeslemetryClient>> {
        let mut epoch = self.inner.epoch.lock().await;
        self.inner.build_into(&mut epoch).await;
        epoch.as_ref().map(|e| Arc::clone(&e.client))
    }

    /// The product catalog, lazily initializing first.
    pub async fn catalog(&self) -> Option<Arc<Catalog>> {
        let mut epoch = self.inner.epoch.lock().await;
        self.inner.build_into(&mut epoch).await;
        epoch.as_ref().map(|e| Arc::clone(&e.catalog))
    }

    /// Client and catalog of the same epoch, lazily initializing first.
    pub async fn snapshot(&self) -> Option<(Arc<TeslemetryClient>, Arc<Catalog>)> {
        let mut epoch = self.inner.epoch.lock().await;
        self.inner.build_into(&mut epoch).await;
        epoch
            .as_ref()
            .map(|e| (Arc::clone(&e.client), Arc::clone(&e.catalog)))
    }

    /// Subscribe to the current epoch's telemetry stream, if one is open.
    pub async fn telemetry(&self) -> Option<broadcast::Receiver<Arc<TelemetryEvent>>> {
        let epoch = self.inner.epoch.lock().await;
        epoch
            .as_ref()
            .and_then(|e| e.stream.as_ref())
            .map(StreamHandle::subscribe)
    }

    /// Valid token and a live epoch with a fetched catalog.
    pub fn is_configured(&self) -> bool {
        self.inner.tokens.has_valid_token()
            && *self.inner.state.borrow() == ConnectionState::Ready
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }
}

impl ControllerInner {
    fn lock_reinit(&self) -> MutexGuard<'_, Option<SharedCycle>> {
        self.reinit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send(state);
    }

    /// Populate `slot` unless it already holds an epoch. Caller holds the
    /// epoch mutex.
    async fn build_into(&self, slot: &mut Option<Epoch>) {
        if slot.is_some() {
            return;
        }

        if !self.tokens.has_valid_token() {
            info!("no valid OAuth2 token, user needs to authorize");
            self.set_state(ConnectionState::Unauthenticated);
            return;
        }

        self.set_state(ConnectionState::Initializing);
        info!("initializing Teslemetry connection");

        match self.build_epoch().await {
            Ok(epoch) => {
                info!(
                    vehicles = epoch.catalog.vehicle_count(),
                    energy_sites = epoch.catalog.energy_site_count(),
                    streaming = epoch.stream.is_some(),
                    "Teslemetry connection ready"
                );
                *slot = Some(epoch);
                self.set_state(ConnectionState::Ready);
            }
            Err(e) => {
                error!(error = %e, "failed to initialize Teslemetry connection");
                self.set_state(ConnectionState::Unauthenticated);
            }
        }
    }

    async fn build_epoch(&self) -> Result<Epoch, CoreError> {
        let source: Arc<dyn TokenSource> = Arc::new(self.tokens.clone());
        let client = Arc::new(TeslemetryClient::new(
            &self.config.api_url,
            &self.config.transport(),
            source,
        )?);

        let stream = if self.config.streaming {
            Some(client.open_stream(
                &self.config.stream_url,
                ReconnectConfig::default(),
                self.cancel.child_token(),
            )?)
        } else {
            None
        };

        match tokio::try_join!(client.products(), client.metadata()) {
            Ok((products, metadata)) => Ok(Epoch {
                catalog: Arc::new(Catalog::from_products(products, &metadata)),
                client,
                stream,
            }),
            Err(e) => {
                if let Some(stream) = stream {
                    stream.close();
                }
                Err(e.into())
            }
        }
    }
}

// ── Token listener ───────────────────────────────────────────────

/// Rebuild on every saved token, tear down when credentials are cleared.
async fn token_listener(
    controller: ConnectionController,
    mut events: broadcast::Receiver<TokenEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(TokenEvent::Saved) => {
                    info!("OAuth2 token saved, reinitializing Teslemetry");
                    controller.reinitialize().await;
                }
                Ok(TokenEvent::Cleared) => controller.teardown().await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "token events lagged, reinitializing");
                    controller.reinitialize().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    debug!("token listener exiting");
}

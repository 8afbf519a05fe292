//! Command handlers and the shared connection bootstrap.

pub mod action;
pub mod auth;
pub mod config_cmd;
pub mod products;
pub mod set;
pub mod watch;

use std::sync::Arc;

use tracing::info;

use teslemetry_api::GrantClient;
use teslemetry_config::{Config, open_token_store};
use teslemetry_core::{Catalog, ConnectionConfig, ConnectionController, CoreError, TokenManager};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Auth(args) => auth::handle(args, global).await,
        Command::Products(args) => products::handle(args, global).await,
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Set(args) => set::handle(args, global).await,
        Command::Action(args) => action::handle(args, global).await,
        // Handled before dispatch; they never need a connection.
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

// ── Bootstrap ────────────────────────────────────────────────────────

/// The config file named by `--config`, or the platform default.
pub(crate) fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let config = match global.config.as_deref() {
        Some(path) => teslemetry_config::load_config_from(path)?,
        None => teslemetry_config::load_config()?,
    };
    Ok(config)
}

/// Token manager seeded from the configured token store.
pub(crate) async fn token_manager(
    global: &GlobalOpts,
) -> Result<(ConnectionConfig, TokenManager), CliError> {
    let config = load_config(global)?;
    let connection = config.to_connection_config()?;
    let store = open_token_store(&config)?;
    let grants = GrantClient::new(connection.oauth.clone(), &connection.transport())
        .map_err(CoreError::from)?;
    let tokens = TokenManager::load(grants, store, connection.device_name.clone()).await?;
    Ok((connection, tokens))
}

/// Build a controller. The telemetry stream only opens when `streaming` is
/// requested and the config allows it.
pub(crate) async fn connect(
    global: &GlobalOpts,
    streaming: bool,
) -> Result<ConnectionController, CliError> {
    let (mut connection, tokens) = token_manager(global).await?;
    connection.streaming &= streaming;

    // A stored but expired token is renewed up front; initialization only
    // accepts a currently valid one.
    if tokens.current_token().is_some() && !tokens.has_valid_token() {
        info!("stored token has expired, refreshing");
        tokens.refresh_token().await?;
    }

    Ok(ConnectionController::new(connection, tokens))
}

/// The product catalog, or the reason there is none.
pub(crate) async fn require_catalog(
    controller: &ConnectionController,
) -> Result<Arc<Catalog>, CliError> {
    if let Some(catalog) = controller.catalog().await {
        return Ok(catalog);
    }
    if controller.tokens().has_valid_token() {
        Err(CliError::ConnectionFailed {
            url: controller.config().api_url.clone(),
            reason: "the product list could not be fetched (rerun with -v for details)".into(),
        })
    } else {
        Err(CliError::NotAuthorized)
    }
}

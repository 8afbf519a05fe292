// ── Device drivers ──
//
// Each driver binds one Teslemetry product to a `CapabilityHost`: it maps
// polled or streamed data onto capability values through the live applier
// and turns capability writes into vendor commands. Drivers own their
// background tasks and stop them on `detach` or drop.

pub mod energy_site;
pub mod vehicle;
pub mod wall_connector;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use teslemetry_api::TeslemetryClient;
use teslemetry_api::types::CommandResponse;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::connection::ConnectionController;
use crate::error::CoreError;
use crate::model::{Catalog, CapabilityValue};

pub use energy_site::EnergySiteDevice;
pub use vehicle::VehicleDevice;
pub use wall_connector::WallConnectorDevice;

/// Run `poll` every `period` until cancelled. The first run happens one
/// period after spawning.
pub(crate) fn spawn_poller<F, Fut>(
    what: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut poll: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), CoreError>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = poll().await {
                        warn!(poll = what, error = %e, "periodic poll failed");
                    }
                }
            }
        }
    })
}

/// Live client and catalog of the current connection epoch.
pub(crate) async fn connected(
    controller: &ConnectionController,
) -> Result<(Arc<TeslemetryClient>, Arc<Catalog>), CoreError> {
    controller.snapshot().await.ok_or(CoreError::NotConfigured)
}

/// Map a vendor command answer onto `Ok` or [`CoreError::Rejected`].
pub(crate) fn check_command(response: &CommandResponse) -> Result<(), CoreError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(CoreError::Rejected {
            message: response
                .failure_reason()
                .unwrap_or("command failed")
                .to_owned(),
        })
    }
}

pub(crate) fn expect_bool(capability: &str, value: &CapabilityValue) -> Result<bool, CoreError> {
    value.as_bool().ok_or_else(|| CoreError::WriteRejected {
        capability: capability.to_owned(),
        reason: format!("expected a boolean, got `{value}`"),
    })
}

pub(crate) fn expect_number(capability: &str, value: &CapabilityValue) -> Result<f64, CoreError> {
    value.as_f64().ok_or_else(|| CoreError::WriteRejected {
        capability: capability.to_owned(),
        reason: format!("expected a number, got `{value}`"),
    })
}

pub(crate) fn expect_text<'a>(
    capability: &str,
    value: &'a CapabilityValue,
) -> Result<&'a str, CoreError> {
    value.as_str().ok_or_else(|| CoreError::WriteRejected {
        capability: capability.to_owned(),
        reason: format!("expected text, got `{value}`"),
    })
}

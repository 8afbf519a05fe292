// ── Wall Connector driver ──
//
// A Wall Connector has no endpoint of its own: its state rides along in the
// owning energy site's `live_status`, keyed by DIN, and its delivered energy
// comes from the site's charge history.

use std::collections::BTreeSet;
use std::sync::Arc;

use teslemetry_api::TeslemetryClient;
use teslemetry_api::types::{ChargeHistory, LiveStatus, WallConnectorStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{connected, spawn_poller};
use crate::capability;
use crate::connection::ConnectionController;
use crate::device::CapabilityHost;
use crate::error::CoreError;
use crate::live::{FieldUpdate, LiveUpdateApplier, UPDATE_QUEUE_CAPACITY};
use crate::model::Catalog;

pub const CAPABILITIES: &[&str] = &[
    "measure_power",
    "evcharger_charging_state",
    "connected_vehicle",
    "meter_power",
];

const DISCONNECTED: &str = "disconnected";

/// `wall_connector_state` → `evcharger_charging_state`.
pub fn charging_state(state: Option<i64>) -> &'static str {
    match state {
        Some(1) => "plugged_in_charging",
        Some(2) => "plugged_out",
        Some(3) => "plugged_in",
        Some(4) => "plugged_in_paused",
        other => {
            debug!(state = ?other, "unknown wall_connector_state");
            "plugged_out"
        }
    }
}

/// Catalog name of the connected vehicle, else its VIN.
pub fn connected_vehicle(catalog: &Catalog, vin: Option<&str>) -> String {
    match vin.filter(|v| !v.is_empty()) {
        None => DISCONNECTED.to_owned(),
        Some(vin) => catalog
            .vehicle(vin)
            .map_or_else(|| vin.to_owned(), |v| v.name.clone()),
    }
}

pub fn wall_connector_updates(status: &WallConnectorStatus, catalog: &Catalog) -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new("measure_power", status.wall_connector_power),
        FieldUpdate::new(
            "evcharger_charging_state",
            Some(charging_state(status.wall_connector_state)),
        ),
        FieldUpdate::new(
            "connected_vehicle",
            Some(connected_vehicle(catalog, status.vin.as_deref())),
        ),
    ]
}

/// Total energy delivered, in kWh.
pub fn meter_update(history: &ChargeHistory) -> FieldUpdate {
    FieldUpdate::new("meter_power", history.energy_added_kwh())
}

fn find<'a>(status: &'a LiveStatus, din: &str) -> Option<&'a WallConnectorStatus> {
    status.wall_connectors.iter().find(|wc| wc.din == din)
}

struct ConnectorContext {
    site_id: u64,
    din: String,
    client: Arc<TeslemetryClient>,
    catalog: Arc<Catalog>,
}

impl ConnectorContext {
    async fn refresh(&self) -> Result<Vec<FieldUpdate>, CoreError> {
        let (status, history) = tokio::join!(
            self.client.live_status(self.site_id),
            self.client.charge_history(self.site_id)
        );

        let mut updates = find(&status?, &self.din)
            .map(|wc| wall_connector_updates(wc, &self.catalog))
            .unwrap_or_default();
        match history {
            Ok(history) => updates.push(meter_update(&history)),
            Err(e) => warn!(din = %self.din, error = %e, "charge history fetch failed"),
        }
        Ok(updates)
    }
}

pub struct WallConnectorDevice {
    din: String,
    ctx: Arc<ConnectorContext>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WallConnectorDevice {
    /// Bind the connector `din` of site `site_id` to `host` and start polling.
    pub async fn attach(
        controller: &ConnectionController,
        site_id: u64,
        din: &str,
        host: Arc<dyn CapabilityHost>,
    ) -> Result<Self, CoreError> {
        let (client, catalog) = connected(controller).await?;
        if catalog.energy_site(site_id).is_none() {
            return Err(CoreError::NotFound {
                entity_type: "Energy site".into(),
                identifier: site_id.to_string(),
            });
        }

        let info = client.site_info(site_id).await?;
        if !info.components.wall_connectors.iter().any(|wc| wc.din == din) {
            return Err(CoreError::NotFound {
                entity_type: "Wall Connector".into(),
                identifier: din.to_owned(),
            });
        }

        let desired: BTreeSet<&str> = CAPABILITIES.iter().copied().collect();
        if let Err(e) = capability::reconcile_with(host.as_ref(), &desired).await {
            warn!(din, error = %e, "capability reconciliation failed");
        }

        let ctx = Arc::new(ConnectorContext {
            site_id,
            din: din.to_owned(),
            client,
            catalog,
        });
        let applier = LiveUpdateApplier::new(host);
        match ctx.refresh().await {
            Ok(updates) => {
                applier.apply_all(updates).await;
            }
            Err(e) => warn!(din, error = %e, "initial live status fetch failed"),
        }

        let cancel = CancellationToken::new();
        let (sender, pump) = applier.spawn_pump(UPDATE_QUEUE_CAPACITY, cancel.clone());
        let poller = {
            let ctx = Arc::clone(&ctx);
            spawn_poller(
                "live_status",
                controller.config().poll_interval,
                cancel.clone(),
                move || {
                    let ctx = Arc::clone(&ctx);
                    let sender = sender.clone();
                    async move { sender.send(ctx.refresh().await?).await }
                },
            )
        };

        info!(site_id, din, "wall connector attached");
        Ok(Self {
            din: din.to_owned(),
            ctx,
            cancel,
            tasks: vec![pump, poller],
        })
    }

    pub fn din(&self) -> &str {
        &self.din
    }

    pub fn site_id(&self) -> u64 {
        self.ctx.site_id
    }

    pub async fn detach(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        debug!(din = %self.din, "wall connector detached");
    }
}

impl Drop for WallConnectorDevice {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

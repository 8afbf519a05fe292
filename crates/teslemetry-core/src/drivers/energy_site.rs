// ── Energy site driver ──
//
// Polls `site_info` and `live_status` for one energy site. Every `site_info`
// answer re-runs capability reconciliation before its values are applied,
// so a site that gains a battery grows the matching capabilities on the
// next poll. Capability writes become energy-site commands.

use std::sync::Arc;

use teslemetry_api::TeslemetryClient;
use teslemetry_api::types::{LiveStatus, SiteInfo};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{check_command, connected, expect_bool, expect_number, expect_text, spawn_poller};
use crate::capability::{self, Components, DeviceClass};
use crate::connection::ConnectionController;
use crate::device::CapabilityHost;
use crate::error::CoreError;
use crate::live::{FieldUpdate, LiveUpdateApplier, UPDATE_QUEUE_CAPACITY};
use crate::model::CapabilityValue;

// ── Value mapping ────────────────────────────────────────────────

fn grid_offline(grid_status: &str) -> Option<bool> {
    match grid_status {
        "Active" => Some(false),
        "Inactive" => Some(true),
        _ => None,
    }
}

fn islanded(island_status: &str) -> Option<bool> {
    match island_status {
        "off_grid_intentional" | "off_grid_unintentional" => Some(true),
        "on_grid" => Some(false),
        _ => None,
    }
}

/// Export rule shown on `allow_export`.
fn export_rule(info: &SiteInfo) -> &str {
    match (
        info.components.customer_preferred_export_rule.as_deref(),
        info.components.non_export_configured,
    ) {
        (Some(rule), _) => rule,
        (None, Some(true)) => "never",
        (None, _) => "battery_ok",
    }
}

/// Capability values carried by a `site_info` answer.
pub fn site_info_updates(info: &SiteInfo) -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new(
            "backup_reserve",
            info.backup_reserve_percent.map(|p| p / 100.0),
        ),
        FieldUpdate::new("operation_mode", info.default_real_mode.clone()),
        FieldUpdate::new("allow_export", Some(export_rule(info))),
        // Missing means charging from grid is allowed.
        FieldUpdate::new(
            "charge_from_grid",
            Some(
                !info
                    .components
                    .disallow_charge_from_grid_with_solar_installed
                    .unwrap_or(false),
            ),
        ),
        FieldUpdate::new("storm_watch", info.user_settings.storm_mode_enabled),
    ]
}

/// Capability values carried by a `live_status` answer.
pub fn live_status_updates(status: &LiveStatus) -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new("measure_battery", status.percentage_charged),
        // The API reports discharge as positive.
        FieldUpdate::new("measure_power_battery", status.battery_power.map(|p| -p)),
        FieldUpdate::new("measure_power_solar", status.solar_power),
        FieldUpdate::new("measure_power_grid", status.grid_power),
        FieldUpdate::new("measure_power_load", status.load_power),
        FieldUpdate::new(
            "alarm_off_grid",
            status.grid_status.as_deref().and_then(grid_offline),
        ),
        FieldUpdate::new(
            "alarm_island_status",
            status.island_status.as_deref().and_then(islanded),
        ),
        FieldUpdate::new("alarm_storm_watch_active", status.storm_mode_active),
    ]
}

// ── Site context ─────────────────────────────────────────────────

struct SiteContext {
    site_id: u64,
    client: Arc<TeslemetryClient>,
    host: Arc<dyn CapabilityHost>,
}

impl SiteContext {
    /// Fetch `site_info`, reconcile capabilities, and return its values.
    async fn refresh_site_info(&self) -> Result<(Components, Vec<FieldUpdate>), CoreError> {
        let info = self.client.site_info(self.site_id).await?;
        let components = Components::from(&info.components);

        match capability::reconcile(self.host.as_ref(), &components).await {
            Ok(report) if !report.added.is_empty() || !report.removed.is_empty() => {
                info!(
                    site_id = self.site_id,
                    added = ?report.added,
                    removed = ?report.removed,
                    "energy site capabilities changed"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(site_id = self.site_id, error = %e, "capability reconciliation failed");
            }
        }

        Ok((components, site_info_updates(&info)))
    }

    async fn refresh_live_status(&self) -> Result<Vec<FieldUpdate>, CoreError> {
        let status = self.client.live_status(self.site_id).await?;
        Ok(live_status_updates(&status))
    }
}

// ── EnergySiteDevice ─────────────────────────────────────────────

/// A Powerwall / solar site bound to a capability host.
pub struct EnergySiteDevice {
    site_id: u64,
    name: String,
    class: DeviceClass,
    ctx: Arc<SiteContext>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EnergySiteDevice {
    /// Look the site up in the catalog, reconcile and populate `host`, then
    /// start polling.
    ///
    /// Fails with [`CoreError::NotConfigured`] without a live connection and
    /// [`CoreError::NotFound`] when the account has no such site.
    pub async fn attach(
        controller: &ConnectionController,
        site_id: u64,
        host: Arc<dyn CapabilityHost>,
    ) -> Result<Self, CoreError> {
        let (client, catalog) = connected(controller).await?;
        let name = catalog
            .energy_site(site_id)
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "Energy site".into(),
                identifier: site_id.to_string(),
            })?
            .name
            .clone();

        let ctx = Arc::new(SiteContext {
            site_id,
            client,
            host: Arc::clone(&host),
        });
        let applier = LiveUpdateApplier::new(host);

        let (components, updates) = ctx.refresh_site_info().await?;
        applier.apply_all(updates).await;
        match ctx.refresh_live_status().await {
            Ok(updates) => {
                applier.apply_all(updates).await;
            }
            Err(e) => warn!(site_id, error = %e, "initial live status fetch failed"),
        }

        let cancel = CancellationToken::new();
        let (sender, pump) = applier.spawn_pump(UPDATE_QUEUE_CAPACITY, cancel.clone());
        let period = controller.config().poll_interval;

        let site_info_poller = {
            let ctx = Arc::clone(&ctx);
            let sender = sender.clone();
            spawn_poller("site_info", period, cancel.clone(), move || {
                let ctx = Arc::clone(&ctx);
                let sender = sender.clone();
                async move {
                    let (_, updates) = ctx.refresh_site_info().await?;
                    sender.send(updates).await
                }
            })
        };
        let live_status_poller = {
            let ctx = Arc::clone(&ctx);
            spawn_poller("live_status", period, cancel.clone(), move || {
                let ctx = Arc::clone(&ctx);
                let sender = sender.clone();
                async move { sender.send(ctx.refresh_live_status().await?).await }
            })
        };

        let class = capability::device_class(&components);
        info!(site_id, name = %name, class = %class, "energy site attached");

        Ok(Self {
            site_id,
            name,
            class,
            ctx,
            cancel,
            tasks: vec![pump, site_info_poller, live_status_poller],
        })
    }

    pub fn site_id(&self) -> u64 {
        self.site_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class derived from the components seen at attach.
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Send a capability write to the site, then record it on the host.
    pub async fn set_capability(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), CoreError> {
        let client = &self.ctx.client;
        let site_id = self.site_id;

        let response = match capability {
            "backup_reserve" => {
                let fraction = expect_number(capability, &value)?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let percent = (fraction * 100.0).round().clamp(0.0, 100.0) as u8;
                debug!(site_id, percent, "setting backup reserve");
                client.set_backup_reserve(site_id, percent).await?
            }
            "operation_mode" => {
                let mode = expect_text(capability, &value)?;
                debug!(site_id, mode, "setting operation mode");
                client.set_operation_mode(site_id, mode).await?
            }
            "allow_export" => {
                let rule = expect_text(capability, &value)?;
                debug!(site_id, rule, "setting export rule");
                client.grid_import_export(site_id, Some(rule), None).await?
            }
            "charge_from_grid" => {
                let allowed = expect_bool(capability, &value)?;
                debug!(site_id, allowed, "setting charge from grid");
                client
                    .grid_import_export(site_id, None, Some(!allowed))
                    .await?
            }
            "storm_watch" => {
                let enabled = expect_bool(capability, &value)?;
                debug!(site_id, enabled, "setting storm watch");
                client.set_storm_mode(site_id, enabled).await?
            }
            other => {
                return Err(CoreError::Unsupported {
                    operation: format!("set {other} on an energy site"),
                });
            }
        };
        check_command(&response)?;

        self.ctx
            .host
            .set_capability_value(capability, value)
            .await
    }

    /// Stop polling and wait for the background tasks to finish.
    pub async fn detach(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        debug!(site_id = self.site_id, "energy site detached");
    }
}

impl Drop for EnergySiteDevice {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::device::DeviceRecord;

    fn site_info(json: serde_json::Value) -> SiteInfo {
        serde_json::from_value(json).unwrap()
    }

    async fn apply(updates: Vec<FieldUpdate>, caps: &[&str]) -> Arc<DeviceRecord> {
        let record = Arc::new(DeviceRecord::new("site", "Home").with_capabilities(caps.iter().copied()));
        LiveUpdateApplier::new(record.clone()).apply_all(updates).await;
        record
    }

    #[test]
    fn export_rule_prefers_explicit_rule() {
        let explicit = site_info(json!({
            "components": { "customer_preferred_export_rule": "pv_only", "non_export_configured": true }
        }));
        let non_export = site_info(json!({ "components": { "non_export_configured": true } }));
        let neither = site_info(json!({ "components": {} }));

        assert_eq!(export_rule(&explicit), "pv_only");
        assert_eq!(export_rule(&non_export), "never");
        assert_eq!(export_rule(&neither), "battery_ok");
    }

    #[tokio::test]
    async fn site_info_values() {
        let info = site_info(json!({
            "backup_reserve_percent": 20,
            "default_real_mode": "self_consumption",
            "components": { "disallow_charge_from_grid_with_solar_installed": true },
            "user_settings": { "storm_mode_enabled": false }
        }));
        let record = apply(
            site_info_updates(&info),
            &["backup_reserve", "operation_mode", "allow_export", "charge_from_grid", "storm_watch"],
        )
        .await;

        assert_eq!(record.capability_value("backup_reserve"), Some(CapabilityValue::Number(0.2)));
        assert_eq!(
            record.capability_value("operation_mode"),
            Some(CapabilityValue::Text("self_consumption".into()))
        );
        assert_eq!(record.capability_value("charge_from_grid"), Some(CapabilityValue::Bool(false)));
        assert_eq!(record.capability_value("storm_watch"), Some(CapabilityValue::Bool(false)));
    }

    #[tokio::test]
    async fn live_status_values() {
        let status: LiveStatus = serde_json::from_value(json!({
            "percentage_charged": 55.5,
            "battery_power": 1500,
            "grid_status": "Inactive",
            "island_status": "off_grid_unintentional",
        }))
        .unwrap();
        let record = apply(
            live_status_updates(&status),
            &["measure_battery", "measure_power_battery", "alarm_off_grid", "alarm_island_status", "measure_power_solar"],
        )
        .await;

        assert_eq!(record.capability_value("measure_power_battery"), Some(CapabilityValue::Number(-1500.0)));
        assert_eq!(record.capability_value("alarm_off_grid"), Some(CapabilityValue::Bool(true)));
        assert_eq!(record.capability_value("alarm_island_status"), Some(CapabilityValue::Bool(true)));
        assert_eq!(record.capability_value("measure_power_solar"), None);
    }

    #[test]
    fn unknown_grid_status_is_skipped() {
        assert_eq!(grid_offline("SomethingElse"), None);
        assert_eq!(islanded("unknown"), None);
        assert_eq!(islanded("on_grid"), Some(false));
    }
}

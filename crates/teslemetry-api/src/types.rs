// Wire types for the Teslemetry REST API.
//
// Every response is wrapped in `{ "response": ... }`; fields the bridge does
// not consume are left out and ignored by serde.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `{ "response": T }` envelope used by every REST endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub response: T,
}

// ── Products ─────────────────────────────────────────────────────────

/// One entry of `GET /api/1/products`.
///
/// The endpoint mixes vehicles and energy sites in a single array; entries
/// that match neither shape land in `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Product {
    Vehicle(VehicleSummary),
    EnergySite(EnergySiteSummary),
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSummary {
    pub vin: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergySiteSummary {
    pub energy_site_id: u64,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
}

// ── Metadata ─────────────────────────────────────────────────────────

/// `GET /api/1/metadata`: what Teslemetry is allowed to do per product.
///
/// Unlike the other endpoints this one is not enveloped. Energy site keys
/// are the site id rendered as a string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub vehicles: HashMap<String, VehicleMetadata>,
    #[serde(default)]
    pub energy_sites: HashMap<String, EnergySiteMetadata>,
}

impl Metadata {
    pub fn vehicle(&self, vin: &str) -> Option<&VehicleMetadata> {
        self.vehicles.get(vin)
    }

    pub fn energy_site(&self, id: u64) -> Option<&EnergySiteMetadata> {
        self.energy_sites.get(&id.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleMetadata {
    #[serde(default)]
    pub access: bool,
    /// Firmware-reported telemetry version, `false` or absent when the
    /// vehicle cannot stream.
    #[serde(default)]
    pub fleet_telemetry: Option<serde_json::Value>,
}

impl VehicleMetadata {
    pub fn streams_telemetry(&self) -> bool {
        match &self.fleet_telemetry {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnergySiteMetadata {
    #[serde(default)]
    pub access: bool,
}

// ── Energy site info ─────────────────────────────────────────────────

/// `GET /api/1/energy_sites/{id}/site_info`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteInfo {
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub backup_reserve_percent: Option<f64>,
    #[serde(default)]
    pub default_real_mode: Option<String>,
    #[serde(default)]
    pub components: SiteComponents,
    #[serde(default)]
    pub user_settings: UserSettings,
    #[serde(default)]
    pub version: Option<String>,
}

/// Hardware component descriptor for an energy site.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteComponents {
    #[serde(default)]
    pub solar: bool,
    #[serde(default)]
    pub battery: bool,
    #[serde(default)]
    pub grid: bool,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub load_meter: bool,
    #[serde(default)]
    pub storm_mode_capable: bool,
    #[serde(default)]
    pub customer_preferred_export_rule: Option<String>,
    #[serde(default)]
    pub non_export_configured: Option<bool>,
    #[serde(default)]
    pub disallow_charge_from_grid_with_solar_installed: Option<bool>,
    #[serde(default)]
    pub wall_connectors: Vec<WallConnectorInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub storm_mode_enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WallConnectorInfo {
    pub din: String,
    #[serde(default)]
    pub part_name: Option<String>,
}

// ── Energy site live status ──────────────────────────────────────────

/// `GET /api/1/energy_sites/{id}/live_status`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveStatus {
    #[serde(default)]
    pub percentage_charged: Option<f64>,
    #[serde(default)]
    pub battery_power: Option<f64>,
    #[serde(default)]
    pub solar_power: Option<f64>,
    #[serde(default)]
    pub grid_power: Option<f64>,
    #[serde(default)]
    pub load_power: Option<f64>,
    #[serde(default)]
    pub grid_status: Option<String>,
    #[serde(default)]
    pub island_status: Option<String>,
    #[serde(default)]
    pub storm_mode_active: Option<bool>,
    #[serde(default)]
    pub wall_connectors: Vec<WallConnectorStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WallConnectorStatus {
    pub din: String,
    #[serde(default)]
    pub wall_connector_power: Option<f64>,
    #[serde(default)]
    pub wall_connector_state: Option<i64>,
    #[serde(default)]
    pub vin: Option<String>,
}

// ── Charge history ───────────────────────────────────────────────────

/// `GET /api/1/energy_sites/{id}/telemetry_history?kind=charge`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeHistory {
    #[serde(default)]
    pub time_series: Vec<ChargeSession>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeSession {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub energy_added_wh: Option<f64>,
}

impl ChargeHistory {
    /// Energy added over all sessions in kWh, `None` when no session
    /// reports any.
    pub fn energy_added_kwh(&self) -> Option<f64> {
        self.time_series
            .iter()
            .filter_map(|s| s.energy_added_wh)
            .fold(None, |total, wh| Some(total.unwrap_or(0.0) + wh))
            .map(|wh| wh / 1000.0)
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Result of any command endpoint.
///
/// Vehicle commands answer `{result, reason}`; energy commands answer
/// `{code, message}`. Both shapes deserialize here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.result != Some(false) && self.code.is_none_or(|c| c < 400)
    }

    /// Human-readable failure reason, if the vendor gave one.
    pub fn failure_reason(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .or(self.message.as_deref())
            .filter(|r| !r.is_empty())
    }
}

//! Capability reconciliation.
//!
//! An energy site's control surface is a pure function of its hardware
//! components: [`desired_capabilities`] maps a [`Components`] descriptor
//! through a fixed table, and [`reconcile`] makes a device's actual
//! capability list match it. Reconciliation never touches values.
//!
//! Reconciliation is idempotent. A capability the platform has no
//! definition for is skipped with a warning and reported in
//! [`ReconcileReport::skipped`]; any other host error aborts the run.

use std::collections::BTreeSet;

use serde::Serialize;
use strum::Display;
use teslemetry_api::types::SiteComponents;
use tracing::{debug, warn};

use crate::device::CapabilityHost;
use crate::error::CoreError;

// ── Component table ──────────────────────────────────────────────

/// Hardware flags that drive the capability set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Components {
    pub solar: bool,
    pub battery: bool,
    pub storm_mode_capable: bool,
    pub backup: bool,
    pub grid: bool,
    pub load_meter: bool,
}

impl From<&SiteComponents> for Components {
    fn from(c: &SiteComponents) -> Self {
        Self {
            solar: c.solar,
            battery: c.battery,
            storm_mode_capable: c.storm_mode_capable,
            backup: c.backup,
            grid: c.grid,
            load_meter: c.load_meter,
        }
    }
}

const SOLAR: &[&str] = &["measure_power_solar", "allow_export"];
const BATTERY: &[&str] = &[
    "measure_battery",
    "measure_power_battery",
    "charge_from_grid",
    "allow_export",
    "operation_mode",
];
const STORM_MODE: &[&str] = &["storm_watch", "alarm_storm_watch_active"];
const BACKUP: &[&str] = &["backup_reserve"];
const GRID: &[&str] = &["alarm_off_grid", "measure_power_grid", "alarm_island_status"];
const LOAD_METER: &[&str] = &["measure_power_load"];

/// Union of the table rows whose flag is set.
pub fn desired_capabilities(components: &Components) -> BTreeSet<&'static str> {
    [
        (components.solar, SOLAR),
        (components.battery, BATTERY),
        (components.storm_mode_capable, STORM_MODE),
        (components.backup, BACKUP),
        (components.grid, GRID),
        (components.load_meter, LOAD_METER),
    ]
    .into_iter()
    .filter(|(present, _)| *present)
    .flat_map(|(_, caps)| caps.iter().copied())
    .collect()
}

// ── Device class ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Solar,
    Battery,
    Other,
}

/// Battery wins over solar.
pub fn device_class(components: &Components) -> DeviceClass {
    if components.battery {
        DeviceClass::Battery
    } else if components.solar {
        DeviceClass::Solar
    } else {
        DeviceClass::Other
    }
}

// ── Diff ─────────────────────────────────────────────────────────

/// Capabilities to add and remove to turn `actual` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityDiff {
    /// Sorted by name.
    pub add: Vec<String>,
    /// In the order the device lists them.
    pub remove: Vec<String>,
}

impl CapabilityDiff {
    pub fn compute(desired: &BTreeSet<&str>, actual: &[String]) -> Self {
        let add = desired
            .iter()
            .filter(|d| !actual.iter().any(|a| a == *d))
            .map(|d| (*d).to_owned())
            .collect();
        let remove = actual
            .iter()
            .filter(|a| !desired.contains(a.as_str()))
            .cloned()
            .collect();
        Self { add, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

// ── Reconcile ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Capabilities the host had no definition for.
    pub skipped: Vec<String>,
}

/// Bring `host`'s capability list in line with `components`.
pub async fn reconcile(
    host: &dyn CapabilityHost,
    components: &Components,
) -> Result<ReconcileReport, CoreError> {
    reconcile_with(host, &desired_capabilities(components)).await
}

/// [`reconcile`] against an explicit desired set.
pub async fn reconcile_with(
    host: &dyn CapabilityHost,
    desired: &BTreeSet<&str>,
) -> Result<ReconcileReport, CoreError> {
    let diff = CapabilityDiff::compute(desired, &host.capabilities());

    let mut report = ReconcileReport::default();
    if diff.is_empty() {
        return Ok(report);
    }

    for capability in diff.remove {
        match host.remove_capability(&capability).await {
            Ok(()) => {
                debug!(capability = %capability, "removed capability");
                report.removed.push(capability);
            }
            Err(CoreError::CapabilityNotFound { .. }) => {
                warn!(capability = %capability, "capability not found on removal, skipping");
                report.skipped.push(capability);
            }
            Err(e) => return Err(e),
        }
    }

    for capability in diff.add {
        match host.add_capability(&capability).await {
            Ok(()) => {
                debug!(capability = %capability, "added capability");
                report.added.push(capability);
            }
            Err(CoreError::CapabilityNotFound { .. }) => {
                warn!(capability = %capability, "capability definition not found, skipping");
                report.skipped.push(capability);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

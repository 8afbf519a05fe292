//! `teslemetry watch`: attach one device to an in-memory record and print
//! every capability change until Ctrl-C.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use teslemetry_core::{
    CapabilityValue, ConnectionController, DeviceRecord, EnergySiteDevice, VehicleDevice,
    WallConnectorDevice,
};

use crate::cli::{DeviceTarget, GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::connect;

/// A device bound for the lifetime of the command.
enum Attached {
    Site(EnergySiteDevice),
    WallConnector(WallConnectorDevice),
    Vehicle(VehicleDevice),
}

impl Attached {
    async fn attach(
        controller: &ConnectionController,
        target: &DeviceTarget,
        record: Arc<DeviceRecord>,
    ) -> Result<Self, CliError> {
        Ok(match target {
            DeviceTarget::Site { site_id } => {
                Self::Site(EnergySiteDevice::attach(controller, *site_id, record).await?)
            }
            DeviceTarget::WallConnector { site_id, din } => Self::WallConnector(
                WallConnectorDevice::attach(controller, *site_id, din, record).await?,
            ),
            DeviceTarget::Vehicle { vin } => {
                Self::Vehicle(VehicleDevice::attach(controller, vin, record).await?)
            }
        })
    }

    async fn detach(self) {
        match self {
            Self::Site(d) => d.detach().await,
            Self::WallConnector(d) => d.detach().await,
            Self::Vehicle(d) => d.detach().await,
        }
    }
}

fn record_id(target: &DeviceTarget) -> String {
    match target {
        DeviceTarget::Site { site_id } => site_id.to_string(),
        DeviceTarget::WallConnector { din, .. } => din.clone(),
        DeviceTarget::Vehicle { vin } => vin.clone(),
    }
}

#[derive(Debug, Serialize)]
struct ChangeLine<'a> {
    at: DateTime<Utc>,
    capability: &'a str,
    value: &'a CapabilityValue,
}

fn render_change(format: &OutputFormat, color: bool, line: &ChangeLine<'_>) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml => {
            // One JSON object per line keeps the feed streamable.
            serde_json::to_string(line).expect("serialization should not fail")
        }
        OutputFormat::Table | OutputFormat::Plain => format!(
            "{} {}",
            line.at.format("%H:%M:%S"),
            output::format_capability(line.capability, line.value, color)
        ),
    }
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let streaming = matches!(args.target, DeviceTarget::Vehicle { .. });
    let controller = connect(global, streaming).await?;
    controller.start().await;

    let result = watch(&controller, &args.target, global).await;

    controller.shutdown().await;
    result
}

async fn watch(
    controller: &ConnectionController,
    target: &DeviceTarget,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let id = record_id(target);
    let record = Arc::new(DeviceRecord::new(id.clone(), id));
    let device = Attached::attach(controller, target, Arc::clone(&record)).await?;

    let color = output::should_color(&global.color);
    let emit = |capability: &str, value: &CapabilityValue| {
        let line = ChangeLine {
            at: Utc::now(),
            capability,
            value,
        };
        output::print_output(&render_change(&global.output, color, &line), global.quiet);
    };

    let mut changes = record.subscribe();
    for (capability, value) in record.values_snapshot() {
        emit(&capability, &value);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            change = changes.recv() => match change {
                Ok(change) => emit(&change.capability, &change.value),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged, some updates were not printed");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    device.detach().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn json_change_is_one_line() {
        let value = CapabilityValue::Bool(true);
        let line = ChangeLine {
            at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default(),
            capability: "locked",
            value: &value,
        };
        assert_eq!(
            render_change(&OutputFormat::Json, false, &line),
            r#"{"at":"2026-03-01T12:00:00Z","capability":"locked","value":true}"#
        );
        assert_eq!(
            render_change(&OutputFormat::Table, false, &line),
            "12:00:00 locked = true"
        );
    }
}

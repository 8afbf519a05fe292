//! `teslemetry action`: one-shot vehicle actions (horn, lights, wake,
//! keyless driving, HomeLink).

use std::sync::Arc;

use teslemetry_core::drivers::vehicle::VehicleAction;
use teslemetry_core::{DeviceRecord, VehicleDevice};

use crate::cli::{ActionArgs, GlobalOpts};
use crate::error::CliError;

use super::connect;

fn parse_action(raw: &str) -> Result<VehicleAction, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "action".into(),
        reason: format!("unknown action `{raw}` (expected honk_horn, flash_lights, wake_up, keyless_driving or homelink)"),
    })
}

pub async fn handle(args: ActionArgs, global: &GlobalOpts) -> Result<(), CliError> {
    // Validate before touching the network.
    let action = parse_action(&args.action)?;

    let controller = connect(global, false).await?;
    let record = Arc::new(DeviceRecord::new(args.vin.clone(), args.vin.clone()));
    let vehicle = VehicleDevice::attach(&controller, &args.vin, record).await?;

    let result = vehicle.run(action).await;
    vehicle.detach().await;
    controller.teardown().await;
    result?;

    if !global.quiet {
        eprintln!("{action} sent to {}", args.vin);
    }
    Ok(())
}

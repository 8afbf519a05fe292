//! `teslemetry set`: one capability write, sent as the matching command.

use std::sync::Arc;

use teslemetry_core::{CapabilityValue, DeviceRecord, EnergySiteDevice, VehicleDevice};

use crate::cli::{GlobalOpts, SetArgs, SetTarget};
use crate::error::CliError;
use crate::output;

use super::connect;

pub async fn handle(args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = connect(global, false).await?;

    let (capability, value) = match args.target {
        SetTarget::Site {
            site_id,
            capability,
            value,
        } => {
            let value = CapabilityValue::parse_loose(&value);
            let record = Arc::new(DeviceRecord::new(site_id.to_string(), site_id.to_string()));
            let site = EnergySiteDevice::attach(&controller, site_id, record).await?;
            let result = site.set_capability(&capability, value.clone()).await;
            site.detach().await;
            result?;
            (capability, value)
        }
        SetTarget::Vehicle {
            vin,
            capability,
            value,
        } => {
            let value = CapabilityValue::parse_loose(&value);
            let record = Arc::new(DeviceRecord::new(vin.clone(), vin.clone()));
            let vehicle = VehicleDevice::attach(&controller, &vin, record).await?;
            let result = vehicle.set_capability(&capability, value.clone()).await;
            vehicle.detach().await;
            result?;
            (capability, value)
        }
    };

    controller.teardown().await;

    if !global.quiet {
        let color = output::should_color(&global.color);
        eprintln!("Set {}", output::format_capability(&capability, &value, color));
    }
    Ok(())
}

//! `teslemetry products`: what the authorized account owns and the bridge
//! can use.

use serde::Serialize;
use tabled::Tabled;

use teslemetry_core::Catalog;
use teslemetry_core::model::{EnergySiteProduct, VehicleProduct};

use crate::cli::{GlobalOpts, ProductsArgs};
use crate::error::CliError;
use crate::output;

use super::{connect, require_catalog};

#[derive(Debug, Serialize)]
struct ProductEntry {
    kind: &'static str,
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Tabled)]
struct ProductRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn to_row(e: &ProductEntry) -> ProductRow {
    ProductRow {
        kind: e.kind,
        id: e.id.clone(),
        name: e.name.clone(),
        detail: e.detail.clone().unwrap_or_default(),
    }
}

fn vehicle_entry(v: &VehicleProduct) -> ProductEntry {
    ProductEntry {
        kind: "vehicle",
        id: v.vin.clone(),
        name: v.name.clone(),
        detail: v.state.clone(),
    }
}

fn site_entry(s: &EnergySiteProduct) -> ProductEntry {
    ProductEntry {
        kind: "energy_site",
        id: s.id.to_string(),
        name: s.name.clone(),
        detail: s.resource_type.clone(),
    }
}

/// Bridgeable products only, unless `all`.
fn entries(catalog: &Catalog, all: bool) -> Vec<ProductEntry> {
    if all {
        catalog
            .vehicles()
            .map(vehicle_entry)
            .chain(catalog.energy_sites().map(site_entry))
            .collect()
    } else {
        catalog
            .telemetry_vehicles()
            .map(vehicle_entry)
            .chain(catalog.accessible_energy_sites().map(site_entry))
            .collect()
    }
}

pub async fn handle(args: ProductsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = connect(global, false).await?;
    let catalog = require_catalog(&controller).await?;

    let data = entries(&catalog, args.all);
    let out = output::render_list(&global.output, &data, to_row, |e| e.id.clone());
    output::print_output(&out, global.quiet);

    controller.teardown().await;
    Ok(())
}

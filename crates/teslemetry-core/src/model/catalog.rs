use indexmap::IndexMap;
use serde::Serialize;
use teslemetry_api::types::{Metadata, Product};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct VehicleProduct {
    pub vin: String,
    pub name: String,
    pub state: Option<String>,
    /// Streams fleet telemetry, so it can be bridged.
    pub fleet_telemetry: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnergySiteProduct {
    pub id: u64,
    pub name: String,
    pub resource_type: Option<String>,
    /// Teslemetry has been granted access to the site.
    pub access: bool,
}

/// Everything the authorized account owns, in API order, with the access
/// flags from the account metadata.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    vehicles: IndexMap<String, VehicleProduct>,
    energy_sites: IndexMap<u64, EnergySiteProduct>,
}

impl Catalog {
    pub fn from_products(products: Vec<Product>, metadata: &Metadata) -> Self {
        let mut catalog = Self::default();
        for product in products {
            match product {
                Product::Vehicle(v) => {
                    let name = v.display_name.unwrap_or_else(|| v.vin.clone());
                    let fleet_telemetry = metadata
                        .vehicle(&v.vin)
                        .is_some_and(|m| m.streams_telemetry());
                    catalog.vehicles.insert(
                        v.vin.clone(),
                        VehicleProduct {
                            vin: v.vin,
                            name,
                            state: v.state,
                            fleet_telemetry,
                        },
                    );
                }
                Product::EnergySite(s) => {
                    let id = s.energy_site_id;
                    catalog.energy_sites.insert(
                        id,
                        EnergySiteProduct {
                            id,
                            name: s.site_name.unwrap_or_else(|| format!("Energy site {id}")),
                            resource_type: s.resource_type,
                            access: metadata.energy_site(id).is_some_and(|m| m.access),
                        },
                    );
                }
                Product::Unknown(raw) => {
                    debug!(product = %raw, "ignoring unrecognized product");
                }
            }
        }
        catalog
    }

    pub fn vehicle(&self, vin: &str) -> Option<&VehicleProduct> {
        self.vehicles.get(vin)
    }

    pub fn energy_site(&self, id: u64) -> Option<&EnergySiteProduct> {
        self.energy_sites.get(&id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &VehicleProduct> {
        self.vehicles.values()
    }

    pub fn energy_sites(&self) -> impl Iterator<Item = &EnergySiteProduct> {
        self.energy_sites.values()
    }

    /// Vehicles that can be bridged: those streaming fleet telemetry.
    pub fn telemetry_vehicles(&self) -> impl Iterator<Item = &VehicleProduct> {
        self.vehicles.values().filter(|v| v.fleet_telemetry)
    }

    /// Energy sites Teslemetry may read and control.
    pub fn accessible_energy_sites(&self) -> impl Iterator<Item = &EnergySiteProduct> {
        self.energy_sites.values().filter(|s| s.access)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn energy_site_count(&self) -> usize {
        self.energy_sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty() && self.energy_sites.is_empty()
    }
}

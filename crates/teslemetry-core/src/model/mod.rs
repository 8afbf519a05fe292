// ── Domain model ──
//
// Products the account owns and the values written onto capabilities.

pub mod catalog;
pub mod value;

pub use catalog::{Catalog, EnergySiteProduct, VehicleProduct};
pub use value::CapabilityValue;

// teslemetry-core: credential and connection lifecycle between teslemetry-api
// and the automation platform's devices.

pub mod auth;
pub mod capability;
pub mod config;
pub mod connection;
pub mod device;
pub mod drivers;
pub mod error;
pub mod live;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{MemoryTokenStore, PkceChallenge, Token, TokenEvent, TokenManager, TokenStore};
pub use capability::{Components, DeviceClass, ReconcileReport, reconcile};
pub use config::ConnectionConfig;
pub use connection::{ConnectionController, ConnectionState};
pub use device::{CapabilityChange, CapabilityHost, DeviceRecord};
pub use drivers::{EnergySiteDevice, VehicleDevice, WallConnectorDevice};
pub use error::CoreError;
pub use live::{FieldUpdate, FieldValue, LiveUpdateApplier, UpdateOutcome};
pub use model::{CapabilityValue, Catalog};

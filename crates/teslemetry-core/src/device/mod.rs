// ── Platform seam ──
//
// The automation platform owns each device's capability list and values.
// Everything in this crate talks to it through `CapabilityHost`;
// `DeviceRecord` is the in-process implementation.

mod record;

use async_trait::async_trait;

pub use record::{CapabilityChange, DeviceRecord};

use crate::error::CoreError;
use crate::model::CapabilityValue;

/// A device's capability surface as exposed by the host platform.
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    /// Capabilities currently exposed, in insertion order.
    fn capabilities(&self) -> Vec<String>;

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c == capability)
    }

    fn capability_value(&self, capability: &str) -> Option<CapabilityValue>;

    /// Fails with [`CoreError::CapabilityNotFound`] when the platform has no
    /// definition for `capability`.
    async fn add_capability(&self, capability: &str) -> Result<(), CoreError>;

    /// Fails with [`CoreError::CapabilityNotFound`] when `capability` is not
    /// exposed.
    async fn remove_capability(&self, capability: &str) -> Result<(), CoreError>;

    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), CoreError>;
}

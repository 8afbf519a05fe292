use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use super::CapabilityHost;
use crate::error::CoreError;
use crate::model::CapabilityValue;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A value written onto a capability.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityChange {
    pub capability: String,
    pub value: CapabilityValue,
}

/// In-memory device: capability list, current values, change feed.
///
/// Optionally restricted to a set of known capability definitions, in which
/// case adding anything else fails like the platform would.
pub struct DeviceRecord {
    id: String,
    name: String,
    capabilities: RwLock<Vec<String>>,
    values: DashMap<String, CapabilityValue>,
    definitions: Option<HashSet<String>>,
    changes: broadcast::Sender<CapabilityChange>,
    /// Bumped on every capability add/remove.
    version: watch::Sender<u64>,
}

impl DeviceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (version, _) = watch::channel(0);
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: RwLock::new(Vec::new()),
            values: DashMap::new(),
            definitions: None,
            changes,
            version,
        }
    }

    /// Start out exposing `capabilities`.
    pub fn with_capabilities<I, S>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.capabilities.write().unwrap_or_else(PoisonError::into_inner) =
            capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Only accept capabilities from `definitions`.
    pub fn with_definitions<I, S>(mut self, definitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definitions = Some(definitions.into_iter().map(Into::into).collect());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to value writes.
    pub fn subscribe(&self) -> broadcast::Receiver<CapabilityChange> {
        self.changes.subscribe()
    }

    /// Observe capability-list changes (the value is a version counter).
    pub fn watch_capabilities(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// `(capability, value)` for every exposed capability that has a value.
    pub fn values_snapshot(&self) -> Vec<(String, CapabilityValue)> {
        self.capabilities()
            .into_iter()
            .filter_map(|c| {
                let value = self.values.get(&c)?.clone();
                Some((c, value))
            })
            .collect()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

#[async_trait]
impl CapabilityHost for DeviceRecord {
    fn capabilities(&self) -> Vec<String> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn capability_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.values.get(capability).map(|v| v.clone())
    }

    async fn add_capability(&self, capability: &str) -> Result<(), CoreError> {
        if self
            .definitions
            .as_ref()
            .is_some_and(|defs| !defs.contains(capability))
        {
            return Err(CoreError::CapabilityNotFound {
                capability: capability.to_owned(),
            });
        }

        {
            let mut caps = self.capabilities.write().unwrap_or_else(PoisonError::into_inner);
            if caps.iter().any(|c| c == capability) {
                return Ok(());
            }
            caps.push(capability.to_owned());
        }
        self.bump_version();
        Ok(())
    }

    async fn remove_capability(&self, capability: &str) -> Result<(), CoreError> {
        {
            let mut caps = self.capabilities.write().unwrap_or_else(PoisonError::into_inner);
            let Some(index) = caps.iter().position(|c| c == capability) else {
                return Err(CoreError::CapabilityNotFound {
                    capability: capability.to_owned(),
                });
            };
            caps.remove(index);
        }
        self.values.remove(capability);
        self.bump_version();
        Ok(())
    }

    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), CoreError> {
        if !self.has_capability(capability) {
            return Err(CoreError::WriteRejected {
                capability: capability.to_owned(),
                reason: "capability is not exposed by this device".into(),
            });
        }

        self.values.insert(capability.to_owned(), value.clone());
        let _ = self.changes.send(CapabilityChange {
            capability: capability.to_owned(),
            value,
        });
        Ok(())
    }
}

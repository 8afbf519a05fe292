//! Live telemetry → capability values.
//!
//! Telemetry arrives as batches of `(capability, value)` pairs. Each pair is
//! planned independently by [`plan`]:
//!
//! - a capability the device does not expose is skipped, and a deferred
//!   value is never evaluated for it;
//! - a deferred value is evaluated after the support check, and a failing
//!   producer only affects its own pair;
//! - an absent value is skipped.
//!
//! [`LiveUpdateApplier`] executes plans against a [`CapabilityHost`] and never
//! propagates write failures. Each device gets one pump task fed by a
//! bounded channel, so its updates are applied in arrival order.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::device::CapabilityHost;
use crate::error::CoreError;
use crate::model::CapabilityValue;

/// Default depth of a device's update queue.
pub const UPDATE_QUEUE_CAPACITY: usize = 64;

/// Lazily computed value; runs only for supported capabilities.
pub type ValueProducer = Box<dyn FnOnce() -> Result<Option<CapabilityValue>, CoreError> + Send>;

// ── FieldValue ───────────────────────────────────────────────────

pub enum FieldValue {
    Literal(Option<CapabilityValue>),
    Deferred(ValueProducer),
}

impl FieldValue {
    pub fn deferred<F>(producer: F) -> Self
    where
        F: FnOnce() -> Result<Option<CapabilityValue>, CoreError> + Send + 'static,
    {
        Self::Deferred(Box::new(producer))
    }

    fn resolve(self) -> Result<Option<CapabilityValue>, CoreError> {
        match self {
            Self::Literal(value) => Ok(value),
            Self::Deferred(producer) => producer(),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<CapabilityValue> for FieldValue {
    fn from(value: CapabilityValue) -> Self {
        Self::Literal(Some(value))
    }
}

impl<T: Into<CapabilityValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        Self::Literal(value.map(Into::into))
    }
}

/// One `(capability, value)` pair of a telemetry batch.
#[derive(Debug)]
pub struct FieldUpdate {
    pub capability: String,
    pub value: FieldValue,
}

impl FieldUpdate {
    pub fn new(capability: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            capability: capability.into(),
            value: value.into(),
        }
    }
}

// ── Planning ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WriteIntent {
    pub capability: String,
    pub value: CapabilityValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Write(WriteIntent),
    /// The device does not expose the capability.
    Unsupported,
    /// Nothing to write.
    NoValue,
}

impl Plan {
    pub fn into_intent(self) -> Option<WriteIntent> {
        match self {
            Self::Write(intent) => Some(intent),
            Self::Unsupported | Self::NoValue => None,
        }
    }
}

/// Decide what to write for one pair. Pure apart from running the producer.
pub fn plan(
    capabilities: &[String],
    capability: &str,
    value: FieldValue,
) -> Result<Plan, CoreError> {
    if !capabilities.iter().any(|c| c == capability) {
        return Ok(Plan::Unsupported);
    }

    Ok(match value.resolve()? {
        Some(value) => Plan::Write(WriteIntent {
            capability: capability.to_owned(),
            value,
        }),
        None => Plan::NoValue,
    })
}

// ── Applier ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Written,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Applies planned writes to one device.
#[derive(Clone)]
pub struct LiveUpdateApplier {
    host: Arc<dyn CapabilityHost>,
}

impl LiveUpdateApplier {
    pub fn new(host: Arc<dyn CapabilityHost>) -> Self {
        Self { host }
    }

    /// Apply one pair. Failures are logged and reported, never raised.
    pub async fn update(&self, capability: &str, value: FieldValue) -> UpdateOutcome {
        let capabilities = self.host.capabilities();
        match plan(&capabilities, capability, value) {
            Ok(Plan::Write(intent)) => {
                match self
                    .host
                    .set_capability_value(&intent.capability, intent.value)
                    .await
                {
                    Ok(()) => UpdateOutcome::Written,
                    Err(e) => {
                        warn!(capability, error = %e, "capability write failed");
                        UpdateOutcome::Failed
                    }
                }
            }
            Ok(Plan::Unsupported) => {
                debug!(capability, "capability not exposed, skipping update");
                UpdateOutcome::Skipped
            }
            Ok(Plan::NoValue) => {
                debug!(capability, "no value, skipping update");
                UpdateOutcome::Skipped
            }
            Err(e) => {
                warn!(capability, error = %e, "failed to compute capability value");
                UpdateOutcome::Failed
            }
        }
    }

    /// Apply a batch in order; each pair is isolated from the others.
    pub async fn apply_all(&self, updates: Vec<FieldUpdate>) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for FieldUpdate { capability, value } in updates {
            match self.update(&capability, value).await {
                UpdateOutcome::Written => summary.written += 1,
                UpdateOutcome::Skipped => summary.skipped += 1,
                UpdateOutcome::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Spawn this device's pump task.
    pub fn spawn_pump(
        self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (UpdateSender, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(pump_task(self, rx, cancel));
        (UpdateSender { tx }, handle)
    }
}

/// Producer side of a device's update queue.
#[derive(Clone)]
pub struct UpdateSender {
    tx: mpsc::Sender<Vec<FieldUpdate>>,
}

impl UpdateSender {
    /// Queue a batch, waiting for room if the pump is behind.
    pub async fn send(&self, batch: Vec<FieldUpdate>) -> Result<(), CoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tx
            .send(batch)
            .await
            .map_err(|_| CoreError::Internal("update pump has stopped".into()))
    }
}

async fn pump_task(
    applier: LiveUpdateApplier,
    mut rx: mpsc::Receiver<Vec<FieldUpdate>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            batch = rx.recv() => {
                let Some(batch) = batch else { break };
                let summary = applier.apply_all(batch).await;
                debug!(
                    written = summary.written,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "applied telemetry batch"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::DeviceRecord;

    fn caps(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn unsupported_capability_never_runs_producer() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let value = FieldValue::deferred(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(Some(CapabilityValue::Number(1.0)))
        });

        let plan = plan(&caps(&["measure_power"]), "measure_power_solar", value).unwrap();

        assert_eq!(plan, Plan::Unsupported);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn missing_value_plans_nothing() {
        let plan = plan(
            &caps(&["measure_battery"]),
            "measure_battery",
            FieldValue::from(None::<f64>),
        )
        .unwrap();
        assert_eq!(plan.into_intent(), None);
    }

    #[test]
    fn literal_on_supported_capability_becomes_intent() {
        let plan = plan(&caps(&["onoff"]), "onoff", Some(true).into()).unwrap();
        assert_eq!(
            plan.into_intent(),
            Some(WriteIntent {
                capability: "onoff".into(),
                value: CapabilityValue::Bool(true),
            })
        );
    }

    #[tokio::test]
    async fn failing_producer_is_isolated() {
        let record = Arc::new(DeviceRecord::new("v", "Car").with_capabilities([
            "measure_battery",
            "measure_power",
            "locked",
        ]));
        let applier = LiveUpdateApplier::new(record.clone());

        let summary = applier
            .apply_all(vec![
                FieldUpdate::new("measure_battery", Some(80.0)),
                FieldUpdate::new(
                    "measure_power",
                    FieldValue::deferred(|| {
                        Err(CoreError::Internal("charger power is not a number".into()))
                    }),
                ),
                FieldUpdate::new("locked", Some(true)),
                FieldUpdate::new("measure_temperature", Some(21.5)),
            ])
            .await;

        assert_eq!(
            summary,
            ApplySummary {
                written: 2,
                skipped: 1,
                failed: 1,
            }
        );
        assert_eq!(
            record.capability_value("measure_battery"),
            Some(CapabilityValue::Number(80.0))
        );
        assert_eq!(record.capability_value("measure_power"), None);
        assert_eq!(
            record.capability_value("locked"),
            Some(CapabilityValue::Bool(true))
        );
    }

    #[tokio::test]
    async fn pump_applies_batches_in_order() {
        let record = Arc::new(DeviceRecord::new("v", "Car").with_capabilities(["measure_battery"]));
        let mut changes = record.subscribe();
        let cancel = CancellationToken::new();
        let (sender, handle) =
            LiveUpdateApplier::new(record.clone()).spawn_pump(4, cancel.clone());

        for level in [10.0, 20.0, 30.0] {
            sender
                .send(vec![FieldUpdate::new("measure_battery", Some(level))])
                .await
                .unwrap();
        }

        for expected in [10.0, 20.0, 30.0] {
            let change = changes.recv().await.unwrap();
            assert_eq!(change.value, CapabilityValue::Number(expected));
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}

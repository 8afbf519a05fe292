// ── Vehicle driver ──
//
// Vehicles are push-only: signals arrive on the connection's SSE stream and
// are filtered by VIN. When the connection is rebuilt the old stream closes;
// the listener then waits for the next epoch and resubscribes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use strum::{Display, EnumString};
use teslemetry_api::TeslemetryClient;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{check_command, connected, expect_bool, expect_text};
use crate::capability;
use crate::connection::ConnectionController;
use crate::device::CapabilityHost;
use crate::error::CoreError;
use crate::live::{FieldUpdate, FieldValue, LiveUpdateApplier, UPDATE_QUEUE_CAPACITY, UpdateSender};
use crate::model::CapabilityValue;

pub const CAPABILITIES: &[&str] = &[
    "measure_battery",
    "measure_range",
    "onoff.charge",
    "meter_power",
    "measure_power",
    "measure_voltage",
    "measure_current",
    "locked",
    "sentry_mode",
    "valet_mode",
    "locked.charge_cable",
    "thermostat_mode",
    "measure_temperature",
    "measure_temperature.outside",
    "charge_port_door",
    "defrost_mode",
    "steering_wheel_heater",
    "seat_heater_front_left",
    "seat_heater_front_right",
    "alarm_contact.door_front_left",
    "alarm_contact.door_front_right",
    "alarm_contact.door_rear_left",
    "alarm_contact.door_rear_right",
    "frunk",
    "trunk",
    "windowcoverings_state",
    "button.flash_lights",
    "button.honk_horn",
    "button.keyless_driving",
    "button.homelink",
    "button.wake_up",
];

/// Prefix of capabilities that trigger a [`VehicleAction`] instead of
/// holding state.
const BUTTON_PREFIX: &str = "button.";

// ── Signal mapping ───────────────────────────────────────────────

fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Booleans, non-zero numbers, and enum strings other than an off/closed
/// state read as `true`.
fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => Some(
            !(s.is_empty()
                || s.ends_with("Off")
                || s.eq_ignore_ascii_case("off")
                || s.eq_ignore_ascii_case("closed")
                || s.eq_ignore_ascii_case("false")),
        ),
        _ => None,
    }
}

/// Map one telemetry signal onto its capability, if the bridge uses it.
pub fn signal_update(signal: &str, value: &Value) -> Option<FieldUpdate> {
    let update = match signal {
        "BatteryLevel" => FieldUpdate::new("measure_battery", number(value)),
        "BatteryRange" => FieldUpdate::new("measure_range", number(value)),
        "ChargeState" => FieldUpdate::new("onoff.charge", value.as_str().map(|s| s == "Charging")),
        "ChargeEnergyAdded" => FieldUpdate::new("meter_power", number(value)),
        "ChargerPower" => {
            let raw = value.clone();
            FieldUpdate::new(
                "measure_power",
                FieldValue::deferred(move || match raw {
                    Value::Null => Ok(None),
                    ref v => v
                        .as_f64()
                        .map(|kw| Some(CapabilityValue::Number(kw * 1000.0)))
                        .ok_or_else(|| {
                            CoreError::Internal(format!("ChargerPower is not a number: {v}"))
                        }),
                }),
            )
        }
        "ChargerVoltage" => FieldUpdate::new("measure_voltage", number(value)),
        "ChargerActualCurrent" => FieldUpdate::new("measure_current", number(value)),
        "Locked" => FieldUpdate::new("locked", value.as_bool()),
        "SentryMode" => FieldUpdate::new("sentry_mode", value.as_bool()),
        "ValetMode" => FieldUpdate::new("valet_mode", value.as_bool()),
        "ChargePortLatch" => FieldUpdate::new(
            "locked.charge_cable",
            value.as_str().map(|s| s == "Engaged"),
        ),
        "HvacACEnabled" => FieldUpdate::new(
            "thermostat_mode",
            value.as_bool().map(|on| if on { "auto" } else { "off" }),
        ),
        "InsideTemp" => FieldUpdate::new("measure_temperature", number(value)),
        "OutsideTemp" => FieldUpdate::new("measure_temperature.outside", number(value)),
        "ChargePortDoorOpen" => FieldUpdate::new("charge_port_door", value.as_bool()),
        "DefrostMode" => FieldUpdate::new("defrost_mode", flag(value)),
        "SteeringWheelHeater" => FieldUpdate::new("steering_wheel_heater", flag(value)),
        "SeatHeaterLeft" => {
            FieldUpdate::new("seat_heater_front_left", number(value).map(|level| level > 0.0))
        }
        "SeatHeaterRight" => {
            FieldUpdate::new("seat_heater_front_right", number(value).map(|level| level > 0.0))
        }
        "DoorFrontLeft" => FieldUpdate::new("alarm_contact.door_front_left", flag(value)),
        "DoorFrontRight" => FieldUpdate::new("alarm_contact.door_front_right", flag(value)),
        "DoorRearLeft" => FieldUpdate::new("alarm_contact.door_rear_left", flag(value)),
        "DoorRearRight" => FieldUpdate::new("alarm_contact.door_rear_right", flag(value)),
        "FrontTrunk" => FieldUpdate::new("frunk", flag(value)),
        "RearTrunk" => FieldUpdate::new("trunk", flag(value)),
        _ => return None,
    };
    Some(update)
}

/// All capability updates carried by one telemetry event.
pub fn signal_updates(data: &Map<String, Value>) -> Vec<FieldUpdate> {
    data.iter()
        .filter_map(|(signal, value)| signal_update(signal, value))
        .collect()
}

// ── Actions ──────────────────────────────────────────────────────

/// One-shot vehicle actions with no capability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum VehicleAction {
    HonkHorn,
    FlashLights,
    WakeUp,
    /// Enable keyless driving for two minutes.
    KeylessDriving,
    Homelink,
}

impl VehicleAction {
    fn command(self) -> VehicleCommand {
        match self {
            Self::HonkHorn => VehicleCommand::new("honk_horn", json!({})),
            Self::FlashLights => VehicleCommand::new("flash_lights", json!({})),
            Self::WakeUp => VehicleCommand::WakeUp,
            Self::KeylessDriving => VehicleCommand::new("remote_start_drive", json!({})),
            Self::Homelink => VehicleCommand::new("trigger_homelink", json!({ "lat": 0, "lon": 0 })),
        }
    }
}

// ── Capability writes ────────────────────────────────────────────

/// What a capability write sends to the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    Command { name: &'static str, body: Value },
    WakeUp,
    /// Accepted without contacting the vehicle.
    NoOp,
}

impl VehicleCommand {
    fn new(name: &'static str, body: Value) -> Self {
        Self::Command { name, body }
    }
}

fn rejected(capability: &str, reason: impl Into<String>) -> CoreError {
    CoreError::WriteRejected {
        capability: capability.to_owned(),
        reason: reason.into(),
    }
}

/// Map a capability write onto the vehicle command that performs it.
pub fn write_command(capability: &str, value: &CapabilityValue) -> Result<VehicleCommand, CoreError> {
    if let Some(button) = capability.strip_prefix(BUTTON_PREFIX) {
        let action: VehicleAction = button.parse().map_err(|_| CoreError::Unsupported {
            operation: format!("press {capability} on a vehicle"),
        })?;
        return Ok(action.command());
    }

    let command = match capability {
        "locked" => {
            let lock = expect_bool(capability, value)?;
            VehicleCommand::new(if lock { "door_lock" } else { "door_unlock" }, json!({}))
        }
        "onoff.charge" => {
            let on = expect_bool(capability, value)?;
            VehicleCommand::new(if on { "charge_start" } else { "charge_stop" }, json!({}))
        }
        "charge_port_door" => {
            let open = expect_bool(capability, value)?;
            let name = if open {
                "charge_port_door_open"
            } else {
                "charge_port_door_close"
            };
            VehicleCommand::new(name, json!({}))
        }
        // Opening the port door releases the cable latch.
        "locked.charge_cable" => {
            if expect_bool(capability, value)? {
                return Err(rejected(capability, "the charge cable can only be unlocked"));
            }
            VehicleCommand::new("charge_port_door_open", json!({}))
        }
        "thermostat_mode" => match expect_text(capability, value)? {
            "auto" => VehicleCommand::new("auto_conditioning_start", json!({})),
            "off" => VehicleCommand::new("auto_conditioning_stop", json!({})),
            other => return Err(rejected(capability, format!("unknown thermostat mode `{other}`"))),
        },
        "defrost_mode" => {
            let on = expect_bool(capability, value)?;
            VehicleCommand::new(
                "set_preconditioning_max",
                json!({ "on": on, "manual_override": true }),
            )
        }
        "steering_wheel_heater" => {
            let on = expect_bool(capability, value)?;
            VehicleCommand::new("remote_steering_wheel_heater_request", json!({ "on": on }))
        }
        "seat_heater_front_left" | "seat_heater_front_right" => {
            let on = expect_bool(capability, value)?;
            let heater = u8::from(capability == "seat_heater_front_right");
            VehicleCommand::new(
                "remote_seat_heater_request",
                json!({ "heater": heater, "level": if on { 3 } else { 0 } }),
            )
        }
        "sentry_mode" => {
            let on = expect_bool(capability, value)?;
            VehicleCommand::new("set_sentry_mode", json!({ "on": on }))
        }
        "valet_mode" => {
            let on = expect_bool(capability, value)?;
            VehicleCommand::new("set_valet_mode", json!({ "on": on }))
        }
        "frunk" => {
            if !expect_bool(capability, value)? {
                return Err(rejected(capability, "the frunk can only be opened remotely"));
            }
            VehicleCommand::new("actuate_trunk", json!({ "which_trunk": "front" }))
        }
        // The rear trunk toggles whichever way the value points.
        "trunk" => {
            expect_bool(capability, value)?;
            VehicleCommand::new("actuate_trunk", json!({ "which_trunk": "rear" }))
        }
        "windowcoverings_state" => match expect_text(capability, value)? {
            "up" => VehicleCommand::new(
                "window_control",
                json!({ "command": "close", "lat": 0, "lon": 0 }),
            ),
            "down" => VehicleCommand::new(
                "window_control",
                json!({ "command": "vent", "lat": 0, "lon": 0 }),
            ),
            "idle" => VehicleCommand::NoOp,
            other => return Err(rejected(capability, format!("unknown window state `{other}`"))),
        },
        other => {
            return Err(CoreError::Unsupported {
                operation: format!("set {other} on a vehicle"),
            });
        }
    };
    Ok(command)
}

// ── VehicleDevice ────────────────────────────────────────────────

pub struct VehicleDevice {
    vin: String,
    name: String,
    client: Arc<TeslemetryClient>,
    host: Arc<dyn CapabilityHost>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl VehicleDevice {
    /// Bind `vin` to `host` and start following its telemetry.
    pub async fn attach(
        controller: &ConnectionController,
        vin: &str,
        host: Arc<dyn CapabilityHost>,
    ) -> Result<Self, CoreError> {
        let (client, catalog) = connected(controller).await?;
        let name = catalog
            .vehicle(vin)
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "Vehicle".into(),
                identifier: vin.to_owned(),
            })?
            .name
            .clone();

        let desired: BTreeSet<&str> = CAPABILITIES.iter().copied().collect();
        if let Err(e) = capability::reconcile_with(host.as_ref(), &desired).await {
            warn!(vin, error = %e, "capability reconciliation failed");
        }

        if !controller.config().streaming {
            warn!(vin, "telemetry streaming is disabled, vehicle values will not update");
        }

        let cancel = CancellationToken::new();
        let (sender, pump) = LiveUpdateApplier::new(Arc::clone(&host))
            .spawn_pump(UPDATE_QUEUE_CAPACITY, cancel.clone());
        let listener = tokio::spawn(telemetry_task(
            controller.clone(),
            vin.to_owned(),
            sender,
            cancel.clone(),
        ));

        info!(vin, name = %name, "vehicle attached");
        Ok(Self {
            vin: vin.to_owned(),
            name,
            client,
            host,
            cancel,
            tasks: vec![pump, listener],
        })
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the command matching a capability write, then record it.
    /// Buttons run their action and keep no value.
    pub async fn set_capability(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), CoreError> {
        let command = write_command(capability, &value)?;
        self.send(command).await?;

        if capability.starts_with(BUTTON_PREFIX) {
            return Ok(());
        }
        self.host.set_capability_value(capability, value).await
    }

    pub async fn run(&self, action: VehicleAction) -> Result<(), CoreError> {
        debug!(vin = %self.vin, %action, "running vehicle action");
        self.send(action.command()).await
    }

    async fn send(&self, command: VehicleCommand) -> Result<(), CoreError> {
        let response = match command {
            VehicleCommand::Command { name, body } => {
                debug!(vin = %self.vin, command = name, "sending vehicle command");
                self.client.vehicle_command(&self.vin, name, &body).await?
            }
            VehicleCommand::WakeUp => self.client.wake_up(&self.vin).await?,
            VehicleCommand::NoOp => return Ok(()),
        };
        check_command(&response)
    }

    pub async fn detach(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        debug!(vin = %self.vin, "vehicle detached");
    }
}

impl Drop for VehicleDevice {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Telemetry listener ───────────────────────────────────────────

async fn telemetry_task(
    controller: ConnectionController,
    vin: String,
    sender: UpdateSender,
    cancel: CancellationToken,
) {
    let mut state = controller.connection_state();

    loop {
        let mut events = match controller.telemetry().await {
            Some(events) => events,
            None => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }
        };
        debug!(vin = %vin, "subscribed to telemetry");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Ok(event) if event.vin == vin => {
                        if sender.send(signal_updates(&event.data)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(vin = %vin, skipped, "telemetry lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        debug!(vin = %vin, "telemetry stream closed, waiting for the next connection");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::DeviceRecord;
    use crate::live::ApplySummary;

    #[tokio::test]
    async fn maps_signals_onto_capabilities() {
        let data = json!({
            "BatteryLevel": 71.5,
            "ChargeState": "Charging",
            "ChargerPower": 7.2,
            "ChargePortLatch": "Engaged",
            "HvacACEnabled": false,
            "OutsideTemp": 12.0,
            "Odometer": 12000.0
        });
        let record = Arc::new(DeviceRecord::new("v", "Car").with_capabilities(CAPABILITIES.iter().copied()));

        let summary = LiveUpdateApplier::new(record.clone())
            .apply_all(signal_updates(data.as_object().unwrap()))
            .await;

        assert_eq!(summary, ApplySummary { written: 6, skipped: 0, failed: 0 });
        assert_eq!(record.capability_value("measure_power"), Some(CapabilityValue::Number(7200.0)));
        assert_eq!(record.capability_value("onoff.charge"), Some(CapabilityValue::Bool(true)));
        assert_eq!(record.capability_value("locked.charge_cable"), Some(CapabilityValue::Bool(true)));
        assert_eq!(
            record.capability_value("thermostat_mode"),
            Some(CapabilityValue::Text("off".into()))
        );
        assert_eq!(
            record.capability_value("measure_temperature.outside"),
            Some(CapabilityValue::Number(12.0))
        );
    }

    #[tokio::test]
    async fn bad_charger_power_only_fails_itself() {
        let data = json!({ "ChargerPower": "n/a", "Locked": true });
        let record = Arc::new(DeviceRecord::new("v", "Car").with_capabilities(["measure_power", "locked"]));

        let summary = LiveUpdateApplier::new(record.clone())
            .apply_all(signal_updates(data.as_object().unwrap()))
            .await;

        assert_eq!(summary, ApplySummary { written: 1, skipped: 0, failed: 1 });
        assert_eq!(record.capability_value("locked"), Some(CapabilityValue::Bool(true)));
    }

    #[test]
    fn unknown_signals_are_ignored() {
        assert!(signal_update("Odometer", &json!(1.0)).is_none());
    }

    #[test]
    fn actions_parse_from_snake_case() {
        assert_eq!(VehicleAction::from_str("honk_horn").unwrap(), VehicleAction::HonkHorn);
        assert_eq!(VehicleAction::from_str("keyless_driving").unwrap(), VehicleAction::KeylessDriving);
        assert_eq!(VehicleAction::WakeUp.to_string(), "wake_up");
    }

    #[tokio::test]
    async fn maps_climate_door_and_trunk_signals() {
        let data = json!({
            "DefrostMode": "DefrostModeStateMax",
            "SteeringWheelHeater": false,
            "SeatHeaterLeft": 2,
            "SeatHeaterRight": 0,
            "DoorFrontLeft": true,
            "DoorFrontRight": false,
            "DoorRearLeft": false,
            "DoorRearRight": true,
            "FrontTrunk": "Closed",
            "RearTrunk": "Open"
        });
        let record = Arc::new(DeviceRecord::new("v", "Car").with_capabilities(CAPABILITIES.iter().copied()));

        let summary = LiveUpdateApplier::new(record.clone())
            .apply_all(signal_updates(data.as_object().unwrap()))
            .await;
        assert_eq!(summary, ApplySummary { written: 10, skipped: 0, failed: 0 });

        let expected = [
            ("defrost_mode", true),
            ("steering_wheel_heater", false),
            ("seat_heater_front_left", true),
            ("seat_heater_front_right", false),
            ("alarm_contact.door_front_left", true),
            ("alarm_contact.door_front_right", false),
            ("alarm_contact.door_rear_left", false),
            ("alarm_contact.door_rear_right", true),
            ("frunk", false),
            ("trunk", true),
        ];
        for (capability, value) in expected {
            assert_eq!(
                record.capability_value(capability),
                Some(CapabilityValue::Bool(value)),
                "{capability}"
            );
        }
    }

    #[test]
    fn capability_writes_map_to_commands() {
        let cases = [
            ("locked", CapabilityValue::Bool(false), "door_unlock", json!({})),
            (
                "defrost_mode",
                CapabilityValue::Bool(true),
                "set_preconditioning_max",
                json!({ "on": true, "manual_override": true }),
            ),
            (
                "steering_wheel_heater",
                CapabilityValue::Bool(false),
                "remote_steering_wheel_heater_request",
                json!({ "on": false }),
            ),
            (
                "seat_heater_front_left",
                CapabilityValue::Bool(true),
                "remote_seat_heater_request",
                json!({ "heater": 0, "level": 3 }),
            ),
            (
                "seat_heater_front_right",
                CapabilityValue::Bool(false),
                "remote_seat_heater_request",
                json!({ "heater": 1, "level": 0 }),
            ),
            ("valet_mode", CapabilityValue::Bool(true), "set_valet_mode", json!({ "on": true })),
            (
                "locked.charge_cable",
                CapabilityValue::Bool(false),
                "charge_port_door_open",
                json!({}),
            ),
            (
                "frunk",
                CapabilityValue::Bool(true),
                "actuate_trunk",
                json!({ "which_trunk": "front" }),
            ),
            (
                "trunk",
                CapabilityValue::Bool(false),
                "actuate_trunk",
                json!({ "which_trunk": "rear" }),
            ),
            (
                "windowcoverings_state",
                CapabilityValue::Text("down".into()),
                "window_control",
                json!({ "command": "vent", "lat": 0, "lon": 0 }),
            ),
            (
                "windowcoverings_state",
                CapabilityValue::Text("up".into()),
                "window_control",
                json!({ "command": "close", "lat": 0, "lon": 0 }),
            ),
            (
                "button.keyless_driving",
                CapabilityValue::Bool(true),
                "remote_start_drive",
                json!({}),
            ),
            (
                "button.homelink",
                CapabilityValue::Bool(true),
                "trigger_homelink",
                json!({ "lat": 0, "lon": 0 }),
            ),
        ];

        for (capability, value, name, body) in cases {
            assert_eq!(
                write_command(capability, &value).unwrap(),
                VehicleCommand::Command { name, body },
                "{capability} = {value}"
            );
        }
        assert_eq!(
            write_command("button.wake_up", &CapabilityValue::Bool(true)).unwrap(),
            VehicleCommand::WakeUp
        );
        assert_eq!(
            write_command("windowcoverings_state", &CapabilityValue::Text("idle".into())).unwrap(),
            VehicleCommand::NoOp
        );
    }

    #[test]
    fn impossible_writes_are_refused() {
        let refused = [
            ("locked.charge_cable", CapabilityValue::Bool(true)),
            ("frunk", CapabilityValue::Bool(false)),
            ("windowcoverings_state", CapabilityValue::Text("sideways".into())),
            ("seat_heater_front_left", CapabilityValue::Number(3.0)),
        ];
        for (capability, value) in refused {
            assert!(
                matches!(
                    write_command(capability, &value),
                    Err(CoreError::WriteRejected { .. })
                ),
                "{capability}"
            );
        }
        assert!(matches!(
            write_command("button.self_destruct", &CapabilityValue::Bool(true)),
            Err(CoreError::Unsupported { .. })
        ));
        assert!(matches!(
            write_command("alarm_contact.door_front_left", &CapabilityValue::Bool(true)),
            Err(CoreError::Unsupported { .. })
        ));
    }
}

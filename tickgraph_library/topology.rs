//! Ready-made topologies for a two-processor rover
//!
//! The **device** runs the control loop (steering mixer feeding the motor
//! driver) next to a status heartbeat. The **host** runs operator input and
//! telemetry and embeds the device model as the remote `spine`. A
//! **standalone** process runs both halves in one model with no bridge.

use crate::workloads::{
    ConsoleTelemetryWorkload, HeartbeatWorkload, MotorDriverWorkload, RemoteControlWorkload,
    SteeringMixerWorkload, TimingDiagnosticsWorkload,
};
use std::fmt;
use std::str::FromStr;
use tickgraph_core::{
    EngineConfig, Model, TickError, TickResult, WorkloadHandle, WorkloadRegistry, WorkloadType,
};

/// Tag of the device model inside the host model
pub const DEVICE_TAG: &str = "spine";
/// Where the host looks for the device when no address is given
pub const DEFAULT_DEVICE_ADDRESS: &str = "ip:localhost";

pub const CONTROL_RATE_HZ: f64 = 30.0;
pub const STATUS_RATE_HZ: f64 = 15.0;
pub const TELEMETRY_RATE_HZ: f64 = 5.0;

/// Which side of the system this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// Operator side, bridged to a device
    Host,
    /// Control loop, served to a host
    Device,
    /// Everything in one process
    #[default]
    Standalone,
}

impl Platform {
    /// Build this platform's model. `device_address` only applies to `Host`.
    pub fn build_model(&self, device_address: Option<&str>) -> TickResult<Model> {
        match self {
            Platform::Device => {
                let mut model = Model::new("device");
                populate_device_model(&mut model)?;
                Ok(model)
            }
            Platform::Host => {
                let mut device = Model::new("device");
                populate_device_model(&mut device)?;
                let mut model = Model::new("host");
                populate_host_model(
                    &mut model,
                    device,
                    device_address.unwrap_or(DEFAULT_DEVICE_ADDRESS),
                )?;
                Ok(model)
            }
            Platform::Standalone => {
                let mut model = Model::new("standalone");
                populate_standalone_model(&mut model)?;
                Ok(model)
            }
        }
    }

    /// Engine preset matching the platform
    pub fn engine_config(&self) -> EngineConfig {
        match self {
            Platform::Device => EngineConfig::embedded(),
            Platform::Host | Platform::Standalone => EngineConfig::host(),
        }
    }
}

impl FromStr for Platform {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Platform::Host),
            "device" => Ok(Platform::Device),
            "standalone" => Ok(Platform::Standalone),
            other => Err(TickError::config(format!(
                "unknown platform '{}' (host, device, standalone)",
                other
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Host => write!(f, "host"),
            Platform::Device => write!(f, "device"),
            Platform::Standalone => write!(f, "standalone"),
        }
    }
}

/// Steering mixer feeding the motor driver, sequenced so the driver sees
/// this tick's mix. Returns the group handle.
fn add_control_sequence(model: &mut Model) -> TickResult<WorkloadHandle> {
    let mixer = model.add_with_rate(
        SteeringMixerWorkload::TYPE_NAME,
        "steering_mixer",
        CONTROL_RATE_HZ,
    )?;
    let motors = model.add_with_rate(MotorDriverWorkload::TYPE_NAME, "basex", CONTROL_RATE_HZ)?;
    model
        .connect("steering_mixer.outputs.left_motor", "basex.inputs.motor1_speed")?
        .connect("steering_mixer.outputs.right_motor", "basex.inputs.motor2_speed")?;
    model.add_group(
        WorkloadRegistry::SEQUENCED_GROUP,
        "control_sequence",
        &[mixer, motors],
        CONTROL_RATE_HZ,
    )
}

pub fn populate_device_model(model: &mut Model) -> TickResult<()> {
    let control = add_control_sequence(model)?;
    let heart = model.add_with_rate(HeartbeatWorkload::TYPE_NAME, "heart_ui", STATUS_RATE_HZ)?;
    let root = model.add_group(
        WorkloadRegistry::SYNCED_GROUP,
        "device_group",
        &[control, heart],
        CONTROL_RATE_HZ,
    )?;
    model.set_root(root)
}

/// Operator workloads plus `device_model` embedded under [`DEVICE_TAG`]
pub fn populate_host_model(model: &mut Model, device_model: Model, address: &str) -> TickResult<()> {
    let remote = model.add_with_rate(
        RemoteControlWorkload::TYPE_NAME,
        "remote_control",
        CONTROL_RATE_HZ,
    )?;
    let console = model.add_with_rate(
        ConsoleTelemetryWorkload::TYPE_NAME,
        "console",
        TELEMETRY_RATE_HZ,
    )?;
    let timing = model.add_with_rate(
        TimingDiagnosticsWorkload::TYPE_NAME,
        "timing",
        CONTROL_RATE_HZ,
    )?;
    let root = model.add_group(
        WorkloadRegistry::SYNCED_GROUP,
        "root_group",
        &[console, remote, timing],
        CONTROL_RATE_HZ,
    )?;
    model.set_root(root)?;

    model.add_remote_model(device_model, DEVICE_TAG, address)?;
    let spine = |path: &str| format!("|{}|{}", DEVICE_TAG, path);
    model
        .connect("remote_control.outputs.left.x", &spine("steering_mixer.inputs.turn_rate"))?
        .connect("remote_control.outputs.left.y", &spine("steering_mixer.inputs.speed"))?
        .connect(&spine("steering_mixer.outputs.left_motor"), "console.inputs.left_motor")?
        .connect(&spine("steering_mixer.outputs.right_motor"), "console.inputs.right_motor")?
        .connect("remote_control.outputs.left.x", "console.inputs.turn_rate")?
        .connect("remote_control.outputs.left.y", "console.inputs.speed")?;
    Ok(())
}

/// Host and device halves in one model, no bridge
pub fn populate_standalone_model(model: &mut Model) -> TickResult<()> {
    let control = add_control_sequence(model)?;
    let heart = model.add_with_rate(HeartbeatWorkload::TYPE_NAME, "heart_ui", STATUS_RATE_HZ)?;
    let remote = model.add_with_rate(
        RemoteControlWorkload::TYPE_NAME,
        "remote_control",
        CONTROL_RATE_HZ,
    )?;
    let console = model.add_with_rate(
        ConsoleTelemetryWorkload::TYPE_NAME,
        "console",
        TELEMETRY_RATE_HZ,
    )?;
    let timing = model.add_with_rate(
        TimingDiagnosticsWorkload::TYPE_NAME,
        "timing",
        CONTROL_RATE_HZ,
    )?;
    let root = model.add_group(
        WorkloadRegistry::SYNCED_GROUP,
        "root_group",
        &[console, remote, control, heart, timing],
        CONTROL_RATE_HZ,
    )?;
    model.set_root(root)?;

    model
        .connect("remote_control.outputs.left.x", "steering_mixer.inputs.turn_rate")?
        .connect("remote_control.outputs.left.y", "steering_mixer.inputs.speed")?
        .connect("steering_mixer.outputs.left_motor", "console.inputs.left_motor")?
        .connect("steering_mixer.outputs.right_motor", "console.inputs.right_motor")?
        .connect("remote_control.outputs.left.x", "console.inputs.turn_rate")?
        .connect("remote_control.outputs.left.y", "console.inputs.speed")?;
    Ok(())
}

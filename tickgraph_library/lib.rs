//! # tickgraph Standard Library
//!
//! Concrete workloads and ready-made topologies for the tickgraph engine.
//!
//! ## Structure
//!
//! ```text
//! tickgraph_library/
//! ── workloads/      # Standard workload types
//! ── topology.rs     # Host / device / standalone models
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tickgraph_library::{register_workloads, Platform};
//! use tickgraph_core::{Engine, StopFlag, WorkloadRegistry};
//!
//! let mut registry = WorkloadRegistry::new();
//! register_workloads(&mut registry)?;
//!
//! let model = Platform::Host.build_model(Some("ip:10.42.0.60"))?;
//! let mut engine = Engine::new(registry).with_config(Platform::Host.engine_config());
//! engine.load(&model)?;
//! engine.run(&StopFlag::new())?;
//! ```

pub mod topology;
pub mod workloads;

pub use topology::{
    populate_device_model, populate_host_model, populate_standalone_model, Platform,
    DEFAULT_DEVICE_ADDRESS, DEVICE_TAG,
};
pub use workloads::{
    register_workloads, ConsoleTelemetryWorkload, HeartbeatWorkload, MotorDriverWorkload,
    RemoteControlWorkload, SteeringMixerWorkload, StickPattern, TimingDiagnosticsWorkload,
};

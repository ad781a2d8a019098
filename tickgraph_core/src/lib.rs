//! # tickgraph Core
//!
//! The orchestration runtime of the tickgraph robotics framework.
//!
//! tickgraph loads a declarative graph of workloads, ticks them at
//! independently configured rates, routes typed values between their named
//! ports and bridges part of the graph onto a remote device. This crate
//! provides the building blocks:
//!
//! - **Workloads**: units with typed ports and a fixed lifecycle
//! - **Registry**: explicit type-name to factory mapping
//! - **Model**: seeds, connections and embedded remote models
//! - **Scheduling**: the engine, sequenced/synced groups, drift-corrected clock
//! - **Communication**: remote links, wire frames and transports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickgraph_core::{
//!     Engine, Model, PortSchema, PortType, StopFlag, TickContext, TickResult, Workload,
//!     WorkloadConfig, WorkloadRegistry, WorkloadType,
//! };
//!
//! struct Ramp {
//!     value: f64,
//! }
//!
//! impl Workload for Ramp {
//!     fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
//!         self.value += ctx.dt_secs();
//!         ctx.set_output("value", self.value)
//!     }
//! }
//!
//! impl WorkloadType for Ramp {
//!     const TYPE_NAME: &'static str = "RampWorkload";
//!
//!     fn ports() -> PortSchema {
//!         PortSchema::new().output("value", PortType::F64)
//!     }
//!
//!     fn create(_config: &WorkloadConfig) -> TickResult<Self> {
//!         Ok(Ramp { value: 0.0 })
//!     }
//! }
//!
//! fn main() -> TickResult<()> {
//!     let mut registry = WorkloadRegistry::new();
//!     registry.register_type::<Ramp>()?;
//!
//!     let mut model = Model::new("ramp");
//!     let ramp = model.add_with_rate("RampWorkload", "ramp", 50.0)?;
//!     model.set_root(ramp)?;
//!
//!     let stop = StopFlag::new();
//!     let mut engine = Engine::new(registry);
//!     engine.load(&model)?;
//!     engine.run(&stop)
//! }
//! ```

pub mod communication;
pub mod core;
pub mod error;
pub mod memory;
pub mod model;
pub mod registry;
pub mod scheduling;

// Re-export commonly used types for easy access
pub use communication::{
    DefaultTransportFactory, LinkMonitor, LinkState, LinkStatus, MemoryNetwork, Transport,
    TransportFactory,
};
pub use core::{
    GroupAttachment, MetricsSnapshot, PortDescriptor, PortDirection, PortSchema, PortType,
    PortValue, SetupContext, TickContext, Workload, WorkloadConfig, WorkloadMetrics,
    WorkloadState, WorkloadType,
};
pub use error::{TickError, TickResult};
pub use model::{
    DataConnectionSeed, Model, ModelDocument, PortPath, TransportAddress, WorkloadHandle,
    WorkloadSeed,
};
pub use registry::{WorkloadDescriptor, WorkloadKind, WorkloadRegistry};
pub use scheduling::{
    install_signal_handler, spawn_engine_thread, BridgeConfig, Engine, EngineConfig,
    EngineState, ModelSummary, PortHandle, SequencedGroup, StalenessPolicy, StopFlag,
    SyncedGroup,
};

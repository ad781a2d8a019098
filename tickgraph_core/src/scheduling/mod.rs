//! # tickgraph scheduling
//!
//! Turns a [`Model`](crate::model::Model) into running workloads:
//!
//! - **Engine**: load, run and tear down one model, root loop on the calling
//!   thread or on a pinned engine thread
//! - **Groups**: `SequencedGroup` (ordered, single-threaded) and
//!   `SyncedGroup` (one rate-limited worker per child), composable by nesting
//! - **TickClock**: fixed-rate deadlines with drift correction
//! - **StopFlag**: cooperative cancellation, set at most once
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tickgraph_core::{Engine, EngineConfig, StopFlag};
//!
//! let stop = StopFlag::new();
//! let mut engine = Engine::new(registry).with_config(EngineConfig::embedded());
//! engine.load(&model)?;
//! engine.run(&stop)?;
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod groups;
pub(crate) mod plan;
pub mod runner;
pub mod runtime;
pub mod stop;

pub use clock::TickClock;
pub use config::{
    BridgeConfig, EngineConfig, FaultConfig, ReconnectConfig, RuntimeConfig, StalenessPolicy,
    TimingConfig,
};
pub use engine::{Engine, EngineState, ModelSummary, PortHandle, TickHook};
pub use groups::{SequencedGroup, SyncedGroup};
pub use runner::WorkloadRunner;
pub use runtime::{get_core_count, pin_current_thread, spawn_engine_thread};
pub use stop::{install_signal_handler, StopFlag};

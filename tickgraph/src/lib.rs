//! # tickgraph
//!
//! Real-time workload orchestration for robots split across processors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickgraph::prelude::*;
//!
//! fn main() -> TickResult<()> {
//!     let mut registry = WorkloadRegistry::new();
//!     register_workloads(&mut registry)?;
//!
//!     let model = Platform::Standalone.build_model(None)?;
//!     let stop = StopFlag::new();
//!     install_signal_handler(&stop)?;
//!
//!     let mut engine = Engine::new(registry);
//!     engine.load(&model)?;
//!     engine.run(&stop)
//! }
//! ```
//!
//! ## Features
//!
//! - **Declarative models** of typed workloads and port connections
//! - **Sequenced and synced groups** composed by nesting
//! - **Remote bridges** over `uart:`, `ip:` or in-process `local`
//! - **Standard library** of workloads and ready-made topologies

// Re-export core components
pub use tickgraph_core::{self, *};

// Re-export standard library with alias
pub use tickgraph_library as library;

/// The tickgraph prelude - everything needed to build and run a model
pub mod prelude {
    // ============================================
    // Workloads & Ports
    // ============================================
    pub use tickgraph_core::core::{
        PortDescriptor, PortDirection, PortSchema, PortType, PortValue, SetupContext, TickContext,
        Workload, WorkloadConfig, WorkloadState, WorkloadType,
    };

    // ============================================
    // Registry & Model
    // ============================================
    pub use tickgraph_core::model::{Model, ModelDocument, PortPath, TransportAddress};
    pub use tickgraph_core::registry::{WorkloadDescriptor, WorkloadRegistry};

    // ============================================
    // Scheduling
    // ============================================
    pub use tickgraph_core::scheduling::{
        install_signal_handler, BridgeConfig, Engine, EngineConfig, EngineState, StalenessPolicy,
        StopFlag,
    };

    // ============================================
    // Communication
    // ============================================
    pub use tickgraph_core::communication::{LinkState, LinkStatus};

    // ============================================
    // Error Types
    // ============================================
    pub use tickgraph_core::error::{TickError, TickResult};

    // ============================================
    // Standard Library
    // ============================================
    pub use tickgraph_library::{register_workloads, Platform};

    // ============================================
    // Common Std Types
    // ============================================
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

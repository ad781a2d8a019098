//! Workloads and their ports

pub mod port;
pub mod workload;

pub use port::{PortDescriptor, PortDirection, PortSchema, PortType, PortValue};
pub use workload::{
    GroupAttachment, MetricsSnapshot, SetupContext, TickContext, Workload, WorkloadConfig,
    WorkloadMetrics, WorkloadState, WorkloadType,
};

//! Standard workloads
//!
//! | Type name | Role |
//! |---|---|
//! | `HeartbeatWorkload` | beat counter and phase for status displays |
//! | `SteeringMixerWorkload` | speed + turn rate to left/right motor commands |
//! | `MotorDriverWorkload` | four-channel motor command shaping |
//! | `RemoteControlWorkload` | synthetic two-stick operator input |
//! | `ConsoleTelemetryWorkload` | periodic log line of its inputs |
//! | `TimingDiagnosticsWorkload` | measured tick interval, rate and jitter |

pub mod console_telemetry;
pub mod heartbeat;
pub mod motor_driver;
pub mod remote_control;
pub mod steering_mixer;
pub mod timing_diagnostics;

pub use console_telemetry::ConsoleTelemetryWorkload;
pub use heartbeat::HeartbeatWorkload;
pub use motor_driver::MotorDriverWorkload;
pub use remote_control::{RemoteControlWorkload, StickPattern};
pub use steering_mixer::SteeringMixerWorkload;
pub use timing_diagnostics::{TimingDiagnosticsWorkload, TimingSample};

use tickgraph_core::{TickResult, WorkloadRegistry};

/// Register every standard workload type. Call once at startup, before the
/// registry is handed to an engine.
pub fn register_workloads(registry: &mut WorkloadRegistry) -> TickResult<()> {
    registry.register_type::<HeartbeatWorkload>()?;
    registry.register_type::<SteeringMixerWorkload>()?;
    registry.register_type::<MotorDriverWorkload>()?;
    registry.register_type::<RemoteControlWorkload>()?;
    registry.register_type::<ConsoleTelemetryWorkload>()?;
    registry.register_type::<TimingDiagnosticsWorkload>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickgraph_core::WorkloadType;

    #[test]
    fn test_register_workloads_is_idempotent() {
        let mut registry = WorkloadRegistry::new();
        register_workloads(&mut registry).unwrap();
        let count = registry.len();
        register_workloads(&mut registry).unwrap();
        assert_eq!(registry.len(), count);
        assert!(registry.contains(SteeringMixerWorkload::TYPE_NAME));
        assert!(registry.contains(WorkloadRegistry::SYNCED_GROUP));
        assert_eq!(
            registry
                .resolve(HeartbeatWorkload::TYPE_NAME)
                .unwrap()
                .default_tick_rate_hz,
            Some(15.0)
        );
    }
}

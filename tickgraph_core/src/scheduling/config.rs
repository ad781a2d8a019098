// Engine configuration: fault policy, loop timing, bridge and runtime placement
use crate::error::{TickError, TickResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fault escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Consecutive failed ticks of one workload before the engine stops (0 = never)
    pub max_consecutive_failures: u32,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
        }
    }
}

/// Root loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Longest sleep between two stop-flag checks
    pub stop_poll_interval_ms: u64,
    /// Lag, in periods, after which the loop re-anchors instead of catching up
    pub max_catch_up_ticks: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stop_poll_interval_ms: 10,
            max_catch_up_ticks: 3,
        }
    }
}

/// What a bridged input port shows while its link is not delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessPolicy {
    /// Keep the last received value indefinitely
    HoldLast,
    /// Keep the last value for `ms`, then fall back to the port default
    ResetAfter { ms: u64 },
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        StalenessPolicy::HoldLast
    }
}

/// Reconnection back-off: a few quick retries, then exponential growth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub fast_attempts: u32,
    pub fast_delay_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    /// None = retry forever
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            fast_attempts: 3,
            fast_delay_ms: 50,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            factor: 1.8,
            max_retries: None,
        }
    }
}

/// Remote bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Idle time after which a heartbeat frame is sent
    pub heartbeat_interval_ms: u64,
    /// Silence after which a synced link is considered degraded
    pub link_timeout_ms: u64,
    /// Attempts made during `load()` before the link is declared unreachable
    pub initial_connect_attempts: u32,
    pub default_ip_port: u16,
    pub uart_baud_rate: u32,
    pub staleness: StalenessPolicy,
    pub reconnect: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            handshake_timeout_ms: 2000,
            heartbeat_interval_ms: 100,
            link_timeout_ms: 500,
            initial_connect_attempts: 3,
            default_ip_port: 7070,
            uart_baud_rate: 115_200,
            staleness: StalenessPolicy::HoldLast,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }
}

/// Where and how the root loop runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pin the ticking thread to this core
    pub core_affinity: Option<usize>,
    /// Require a per-root-tick hook (see `Engine::set_tick_hook`)
    pub watchdog: bool,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub faults: FaultConfig,
    pub timing: TimingConfig,
    pub bridge: BridgeConfig,
    pub runtime: RuntimeConfig,
}

impl EngineConfig {
    /// General-purpose host: calling thread, no watchdog
    pub fn host() -> Self {
        Self::default()
    }

    /// Constrained dual-core device: control loop pinned to core 1, watchdog
    /// fed every root tick, tighter link supervision
    pub fn embedded() -> Self {
        Self {
            faults: FaultConfig {
                max_consecutive_failures: 5,
            },
            timing: TimingConfig {
                stop_poll_interval_ms: 5,
                max_catch_up_ticks: 2,
            },
            bridge: BridgeConfig {
                connect_timeout_ms: 1000,
                handshake_timeout_ms: 1000,
                heartbeat_interval_ms: 50,
                link_timeout_ms: 250,
                ..BridgeConfig::default()
            },
            runtime: RuntimeConfig {
                core_affinity: Some(1),
                watchdog: true,
            },
        }
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.stop_poll_interval_ms.max(1))
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TickResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => {
                return Err(TickError::config(format!(
                    "unsupported config file '{}': expected .toml, .yaml or .yml",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TickResult<()> {
        let reconnect = &self.bridge.reconnect;
        if !reconnect.factor.is_finite() || reconnect.factor < 1.0 {
            return Err(TickError::config(format!(
                "bridge.reconnect.factor must be >= 1.0, got {}",
                reconnect.factor
            )));
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(TickError::config(
                "bridge.reconnect.max_delay_ms must not be below base_delay_ms",
            ));
        }
        if self.bridge.link_timeout_ms == 0 {
            return Err(TickError::config("bridge.link_timeout_ms must be non-zero"));
        }
        if self.bridge.initial_connect_attempts == 0 {
            return Err(TickError::config(
                "bridge.initial_connect_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

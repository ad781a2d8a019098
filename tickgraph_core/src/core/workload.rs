use crate::core::port::{PortDirection, PortSchema, PortValue};
use crate::error::{TickError, TickResult};
use crate::scheduling::runner::WorkloadRunner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Workload states for monitoring and lifecycle management
#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadState {
    Created,
    Ready,
    Running,
    Stopped,
    TornDown,
    Faulted(String),
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadState::Created => write!(f, "Created"),
            WorkloadState::Ready => write!(f, "Ready"),
            WorkloadState::Running => write!(f, "Running"),
            WorkloadState::Stopped => write!(f, "Stopped"),
            WorkloadState::TornDown => write!(f, "TornDown"),
            WorkloadState::Faulted(msg) => write!(f, "Faulted: {}", msg),
        }
    }
}

/// Per-instance key/value configuration carried by a seed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadConfig {
    values: BTreeMap<String, String>,
}

impl WorkloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_f64(&self, key: &str) -> TickResult<Option<f64>> {
        self.parse(key)
    }

    pub fn get_u64(&self, key: &str) -> TickResult<Option<u64>> {
        self.parse(key)
    }

    pub fn get_bool(&self, key: &str) -> TickResult<Option<bool>> {
        self.parse(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn parse<T: FromStr>(&self, key: &str) -> TickResult<Option<T>>
    where
        T::Err: fmt::Display,
    {
        match self.values.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                TickError::config(format!("config key '{}' = '{}': {}", key, raw, e))
            }),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WorkloadConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Information handed to [`Workload::setup`]
#[derive(Debug)]
pub struct SetupContext<'a> {
    pub name: &'a str,
    pub type_name: &'a str,
    pub tick_rate_hz: f64,
    pub schema: &'a PortSchema,
}

/// Everything a workload sees during one tick.
///
/// Inputs were latched from their bound sources when the tick began; outputs
/// are staged here and published together once the tick completes.
pub struct TickContext<'a> {
    name: &'a str,
    dt: Duration,
    tick_index: u64,
    schema: &'a PortSchema,
    inputs: &'a [PortValue],
    outputs: &'a mut [PortValue],
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        dt: Duration,
        tick_index: u64,
        schema: &'a PortSchema,
        inputs: &'a [PortValue],
        outputs: &'a mut [PortValue],
    ) -> Self {
        Self {
            name,
            dt,
            tick_index,
            schema,
            inputs,
            outputs,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Time since this workload's previous tick (the nominal period on the first)
    pub fn dt(&self) -> Duration {
        self.dt
    }

    pub fn dt_secs(&self) -> f64 {
        self.dt.as_secs_f64()
    }

    /// Zero-based count of ticks before this one
    pub fn tick_index(&self) -> u64 {
        self.tick_index
    }

    pub fn input_at(&self, index: usize) -> Option<&PortValue> {
        self.inputs.get(index)
    }

    pub fn input(&self, name: &str) -> TickResult<&PortValue> {
        self.schema
            .index_of(PortDirection::Input, name)
            .and_then(|i| self.inputs.get(i))
            .ok_or_else(|| TickError::workload(self.name, format!("no input port '{}'", name)))
    }

    pub fn input_f64(&self, name: &str) -> TickResult<f64> {
        let value = self.input(name)?;
        value.as_f64().ok_or_else(|| {
            TickError::workload(
                self.name,
                format!("input '{}' is {}, not numeric", name, value.port_type()),
            )
        })
    }

    pub fn input_f32(&self, name: &str) -> TickResult<f32> {
        self.input_f64(name).map(|v| v as f32)
    }

    pub fn input_bool(&self, name: &str) -> TickResult<bool> {
        let value = self.input(name)?;
        value.as_bool().ok_or_else(|| {
            TickError::workload(self.name, format!("input '{}' is not a bool", name))
        })
    }

    /// Last staged (or last published) value of an output
    pub fn output(&self, name: &str) -> Option<&PortValue> {
        self.schema
            .index_of(PortDirection::Output, name)
            .and_then(|i| self.outputs.get(i))
    }

    /// Stage a value for an output port, coercing numeric widenings.
    pub fn set_output(&mut self, name: &str, value: impl Into<PortValue>) -> TickResult<()> {
        let index = self
            .schema
            .index_of(PortDirection::Output, name)
            .ok_or_else(|| TickError::workload(self.name, format!("no output port '{}'", name)))?;
        self.set_output_at(index, value)
    }

    pub fn set_output_at(&mut self, index: usize, value: impl Into<PortValue>) -> TickResult<()> {
        let descriptor = self.schema.outputs.get(index).ok_or_else(|| {
            TickError::workload(self.name, format!("output index {} out of range", index))
        })?;
        let value = value.into();
        let coerced = value.coerce(descriptor.port_type).ok_or_else(|| {
            TickError::workload(
                self.name,
                format!(
                    "output '{}' expects {}, got {}",
                    descriptor.name,
                    descriptor.port_type,
                    value.port_type()
                ),
            )
        })?;
        self.outputs[index] = coerced;
        Ok(())
    }
}

/// Children handed to a group workload when the engine materializes it.
pub struct GroupAttachment {
    pub group_name: String,
    pub tick_rate_hz: f64,
    /// Consecutive failures of one child before the group escalates (0 = never)
    pub max_consecutive_failures: u32,
    pub children: Vec<WorkloadRunner>,
}

/// A schedulable unit with typed ports and a fixed lifecycle.
///
/// The engine calls `setup` during `load()`, `start` right before the first
/// tick, `tick` at the configured rate, `stop` after the last tick and
/// `teardown` in reverse construction order.
pub trait Workload: Send {
    /// Called once during `Engine::load`
    fn setup(&mut self, _ctx: &SetupContext<'_>) -> TickResult<()> {
        Ok(())
    }

    /// Called on the ticking thread right before the first tick
    fn start(&mut self) -> TickResult<()> {
        Ok(())
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()>;

    /// Called after the last tick, before teardown
    fn stop(&mut self) {}

    fn teardown(&mut self) -> TickResult<()> {
        Ok(())
    }

    /// Group workloads take ownership of their children here.
    fn attach_children(&mut self, attachment: GroupAttachment) -> TickResult<()> {
        if attachment.children.is_empty() {
            return Ok(());
        }
        Err(TickError::topology(format!(
            "'{}' is not a group workload and cannot own children",
            attachment.group_name
        )))
    }
}

/// Static registration surface for a Rust workload type.
///
/// ```rust,ignore
/// impl WorkloadType for SteeringMixer {
///     const TYPE_NAME: &'static str = "SteeringMixerWorkload";
///     fn ports() -> PortSchema { ... }
///     fn create(config: &WorkloadConfig) -> TickResult<Self> { ... }
/// }
/// registry.register_type::<SteeringMixer>()?;
/// ```
pub trait WorkloadType: Workload + Sized + 'static {
    const TYPE_NAME: &'static str;

    fn ports() -> PortSchema;

    fn default_tick_rate_hz() -> Option<f64> {
        None
    }

    fn create(config: &WorkloadConfig) -> TickResult<Self>;
}

/// Lock-free per-instance counters, shared between the ticking thread and
/// `Engine::metrics()`.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct WorkloadMetrics {
    ticks: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
    overruns: AtomicU64,
    last_tick_ns: AtomicU64,
    max_tick_ns: AtomicU64,
}

impl WorkloadMetrics {
    pub(crate) fn record_tick(&self, elapsed: Duration, ok: bool) -> u32 {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_ns.store(ns, Ordering::Relaxed);
        self.max_tick_ns.fetch_max(ns, Ordering::Relaxed);
        if ok {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            0
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    pub(crate) fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, name: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            name: name.to_string(),
            ticks: self.ticks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            last_tick: Duration::from_nanos(self.last_tick_ns.load(Ordering::Relaxed)),
            max_tick: Duration::from_nanos(self.max_tick_ns.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`WorkloadMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub name: String,
    pub ticks: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub overruns: u64,
    pub last_tick: Duration,
    pub max_tick: Duration,
}

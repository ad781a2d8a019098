// Shared workloads for the engine scenarios
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickgraph_core::{
    PortSchema, PortType, TickContext, TickResult, Workload, WorkloadConfig, WorkloadDescriptor,
    WorkloadRegistry,
};

/// Every tick of every logging workload, in the order they happened
pub type TickLog = Arc<Mutex<Vec<(String, f64)>>>;

/// Emits a configured constant, or its own tick count when none is set
struct Source {
    name: String,
    constant: Option<f64>,
    ticks: u64,
    log: TickLog,
}

impl Workload for Source {
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        self.ticks += 1;
        let value = self.constant.unwrap_or(self.ticks as f64);
        self.log.lock().push((self.name.clone(), value));
        ctx.set_output("value", value)
    }
}

struct Doubler;

impl Workload for Doubler {
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        let value = ctx.input_f64("in")?;
        ctx.set_output("out", value * 2.0)
    }
}

/// Records what it sees on its input
struct Sink {
    name: String,
    log: TickLog,
}

impl Workload for Sink {
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        let value = ctx.input_f64("in")?;
        self.log.lock().push((self.name.clone(), value));
        Ok(())
    }
}

pub fn registry(log: &TickLog) -> WorkloadRegistry {
    let mut registry = WorkloadRegistry::new();

    let source_log = Arc::clone(log);
    registry
        .register(WorkloadDescriptor::new(
            "SourceWorkload",
            PortSchema::new().output("value", PortType::F64),
            move |config: &WorkloadConfig| {
                Ok(Box::new(Source {
                    name: config.get_str("label").unwrap_or("source").to_string(),
                    constant: config.get_f64("value")?,
                    ticks: 0,
                    log: Arc::clone(&source_log),
                }))
            },
        ))
        .unwrap();

    registry
        .register(WorkloadDescriptor::new(
            "DoublerWorkload",
            PortSchema::new()
                .input("in", PortType::F64)
                .output("out", PortType::F64),
            |_| Ok(Box::new(Doubler)),
        ))
        .unwrap();

    let sink_log = Arc::clone(log);
    registry
        .register(WorkloadDescriptor::new(
            "SinkWorkload",
            PortSchema::new().input("in", PortType::F64),
            move |config: &WorkloadConfig| {
                Ok(Box::new(Sink {
                    name: config.get_str("label").unwrap_or("sink").to_string(),
                    log: Arc::clone(&sink_log),
                }))
            },
        ))
        .unwrap();

    registry
}

pub fn values_of(log: &TickLog, name: &str) -> Vec<f64> {
    log.lock()
        .iter()
        .filter(|(n, _)| n == name)
        .map(|(_, v)| *v)
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

//! The engine: load a model, run its root loop, tear it down
//!
//! ```rust,ignore
//! let stop = StopFlag::new();
//! install_signal_handler(&stop)?;
//!
//! let mut engine = Engine::new(registry).with_config(EngineConfig::host());
//! engine.load(&model)?;
//! engine.run(&stop)?;   // returns once `stop` is set
//! ```
//!
//! `load` resolves the whole topology before anything runs: every
//! configuration error surfaces there and no workload ever ticks with an
//! unresolved connection. `run` drives the root at its rate with a drift
//! correcting clock, pumps remote links at every root-tick boundary and, on
//! the way out, stops and tears everything down in reverse construction
//! order.

use crate::communication::bridge::{LinkMonitor, LinkStatus, RemoteLink};
use crate::communication::endpoint::ServeEndpoint;
use crate::communication::transport::{DefaultTransportFactory, TransportFactory};
use crate::core::{GroupAttachment, MetricsSnapshot, PortValue, WorkloadMetrics};
use crate::error::{TickError, TickResult};
use crate::memory::PortBlock;
use crate::model::{Model, TransportAddress};
use crate::registry::WorkloadRegistry;
use crate::scheduling::clock::TickClock;
use crate::scheduling::config::EngineConfig;
use crate::scheduling::plan::{self, LoadPlan, PlannedUnit};
use crate::scheduling::runner::{RunnerParts, WorkloadRunner};
use crate::scheduling::runtime::{pin_current_thread, spawn_engine_thread};
use crate::scheduling::stop::StopFlag;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Called once per root tick with the tick count, after links are pumped
pub type TickHook = Box<dyn FnMut(u64) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Empty,
    Loaded,
    Running,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Empty => "Empty",
            EngineState::Loaded => "Loaded",
            EngineState::Running => "Running",
            EngineState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// What `Engine::check` found in a model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub fingerprint: String,
    pub root_rate_hz: f64,
    pub workloads: usize,
    pub port_cells: usize,
    pub bindings: usize,
    /// Remote models merged in-process with `local`
    pub local_models: Vec<String>,
    /// Remote models reached over a transport, as `tag @ address`
    pub links: Vec<String>,
}

/// Shared handle to one port cell, usable from any thread
#[derive(Clone)]
pub struct PortHandle {
    block: Arc<PortBlock>,
    index: usize,
}

impl PortHandle {
    pub fn path(&self) -> &str {
        self.block.cell(self.index).path()
    }

    pub fn get(&self) -> PortValue {
        self.block.get(self.index)
    }

    /// Write a value, widening it to the port type if needed
    pub fn set(&self, value: impl Into<PortValue>) -> TickResult<()> {
        let value = value.into();
        if self.block.set(self.index, &value) {
            return Ok(());
        }
        let cell = self.block.cell(self.index);
        Err(TickError::TypeMismatch {
            src: "value".to_string(),
            dst: cell.path().to_string(),
            src_type: value.port_type().to_string(),
            dst_type: cell.port_type().to_string(),
        })
    }

    /// Times the cell was written
    pub fn version(&self) -> u64 {
        self.block.cell(self.index).version()
    }
}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle")
            .field("path", &self.path())
            .finish()
    }
}

/// A `local` sub-model's root, ticked on its own thread
struct LocalRoot {
    tag: String,
    rate_hz: f64,
    runner: Option<WorkloadRunner>,
    thread: Option<JoinHandle<TickResult<WorkloadRunner>>>,
}

struct LoadedGraph {
    name: String,
    fingerprint: String,
    block: Arc<PortBlock>,
    driven: Vec<bool>,
    root: WorkloadRunner,
    root_rate_hz: f64,
    locals: Vec<LocalRoot>,
    links: Vec<RemoteLink>,
    metrics: Vec<(String, Arc<WorkloadMetrics>)>,
}

impl LoadedGraph {
    /// Reverse construction order: local sub-models, then the host tree,
    /// then links. Safe to call more than once.
    fn teardown(&mut self) {
        for local in self.locals.iter_mut().rev() {
            if let Some(runner) = local.runner.as_mut() {
                runner.stop();
                runner.teardown();
            }
        }
        self.root.stop();
        self.root.teardown();
        for link in self.links.iter_mut().rev() {
            link.close();
        }
    }
}

pub struct Engine {
    registry: Arc<WorkloadRegistry>,
    config: EngineConfig,
    transports: Arc<dyn TransportFactory>,
    state: EngineState,
    tick_hook: Option<TickHook>,
    graph: Option<LoadedGraph>,
    endpoint: Option<ServeEndpoint>,
    root_ticks: u64,
}

impl Engine {
    pub fn new(registry: impl Into<Arc<WorkloadRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            config: EngineConfig::default(),
            transports: Arc::new(DefaultTransportFactory::new()),
            state: EngineState::Empty,
            tick_hook: None,
            graph: None,
            endpoint: None,
            root_ticks: 0,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the transport factory, e.g. to share a `MemoryNetwork`
    pub fn with_transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkloadRegistry {
        &self.registry
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Root ticks completed by the last `run`
    pub fn root_ticks(&self) -> u64 {
        self.root_ticks
    }

    /// Install the per-root-tick hook (required when `runtime.watchdog` is on)
    pub fn set_tick_hook<F>(&mut self, hook: F)
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.tick_hook = Some(Box::new(hook));
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Run every load-time check without instantiating anything
    pub fn check(&self, model: &Model) -> TickResult<ModelSummary> {
        let plan = plan::plan(model, &self.registry)?;
        Ok(summarize(model, &plan))
    }

    pub fn load(&mut self, model: &Model) -> TickResult<()> {
        self.load_until(model, &StopFlag::new())
    }

    /// [`load`](Self::load), but stop retrying remote links once `stop` is
    /// set. The load then fails with a link error.
    pub fn load_until(&mut self, model: &Model, stop: &StopFlag) -> TickResult<()> {
        if self.state != EngineState::Empty {
            return Err(TickError::EngineState(format!(
                "load called on an engine that is {}",
                self.state
            )));
        }
        self.config.validate()?;

        info!(
            "[Engine] loading model '{}' ({} workloads, {} remote models)",
            model.name(),
            model.seeds().len(),
            model.remotes().len()
        );
        let plan = plan::plan(model, &self.registry)?;
        let summary = summarize(model, &plan);
        debug!(
            "[Engine] resolved {} bindings over {} port cells",
            summary.bindings, summary.port_cells
        );

        let driven = plan.driven_inputs();
        let LoadPlan {
            units,
            block,
            input_sources,
            links: link_plans,
            ..
        } = plan;
        let block = Arc::new(block);
        let threshold = self.config.faults.max_consecutive_failures;

        let mut metrics = Vec::new();
        let mut roots = Vec::with_capacity(units.len());
        for unit in &units {
            match materialize(
                unit,
                &self.registry,
                &block,
                &input_sources,
                threshold,
                &mut metrics,
            ) {
                Ok(root) => roots.push((unit.tag.clone(), unit.root_rate(), root)),
                Err(e) => {
                    teardown_roots(&mut roots);
                    return Err(e);
                }
            }
        }
        info!("[Engine] {} workloads set up", metrics.len());

        let mut links = Vec::with_capacity(link_plans.len());
        for link_plan in link_plans {
            match RemoteLink::open(
                link_plan,
                Arc::clone(&block),
                self.config.bridge.clone(),
                Arc::clone(&self.transports),
                stop,
            ) {
                Ok(link) => links.push(link),
                Err(e) => {
                    error!("[Engine] load aborted: {}", e);
                    for link in links.iter_mut().rev() {
                        link.close();
                    }
                    teardown_roots(&mut roots);
                    return Err(e);
                }
            }
        }

        let mut roots = roots.into_iter();
        let Some((_, root_rate_hz, root)) = roots.next() else {
            return Err(TickError::NoRoot {
                model: model.name().to_string(),
            });
        };
        let locals = roots
            .map(|(tag, rate_hz, runner)| LocalRoot {
                tag: tag.unwrap_or_default(),
                rate_hz,
                runner: Some(runner),
                thread: None,
            })
            .collect();

        info!(
            "[Engine] loaded '{}' (model {}, root {} Hz, {} local, {} linked)",
            model.name(),
            summary.fingerprint,
            root_rate_hz,
            summary.local_models.len(),
            summary.links.len()
        );
        self.graph = Some(LoadedGraph {
            name: model.name().to_string(),
            fingerprint: summary.fingerprint,
            block,
            driven,
            root,
            root_rate_hz,
            locals,
            links,
            metrics,
        });
        self.state = EngineState::Loaded;
        Ok(())
    }

    /// Accept host bridges on `address` for the loaded model. Returns the
    /// listener description, which carries the bound port for `ip:` port 0.
    pub fn serve(&mut self, address: &str) -> TickResult<String> {
        if self.state != EngineState::Loaded {
            return Err(TickError::EngineState(format!(
                "serve needs a loaded engine, this one is {}",
                self.state
            )));
        }
        if self.endpoint.is_some() {
            return Err(TickError::EngineState("already serving".to_string()));
        }
        let address = TransportAddress::parse(address)?;
        if address.is_local() {
            return Err(TickError::InvalidAddress {
                address: address.to_string(),
                reason: "'local' cannot be served".to_string(),
            });
        }
        let graph = self.graph.as_ref().ok_or_else(|| {
            TickError::EngineState("serve needs a loaded engine".to_string())
        })?;
        let listener = self.transports.listen(&address, &self.config.bridge)?;
        let label = listener.describe();
        self.endpoint = Some(ServeEndpoint::new(
            listener,
            graph.fingerprint.clone(),
            Arc::clone(&graph.block),
            graph.driven.clone(),
            self.config.bridge.clone(),
        ));
        Ok(label)
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Tick the root until `stop` is set, then stop and tear down. A pre-set
    /// flag returns without ticking anything. Returns the fatal error if
    /// fault escalation ended the run.
    pub fn run(&mut self, stop: &StopFlag) -> TickResult<()> {
        match self.state {
            EngineState::Loaded => {}
            EngineState::Empty => {
                return Err(TickError::EngineState("run called before load".to_string()))
            }
            other => {
                return Err(TickError::EngineState(format!(
                    "run called on an engine that is {}",
                    other
                )))
            }
        }
        if self.config.runtime.watchdog && self.tick_hook.is_none() {
            return Err(TickError::config(
                "runtime.watchdog is enabled but no tick hook is installed",
            ));
        }
        let Some(graph) = self.graph.as_mut() else {
            return Err(TickError::EngineState("run called before load".to_string()));
        };

        if stop.is_set() {
            info!("[Engine] stop requested before the first tick");
            graph.teardown();
            if let Some(endpoint) = self.endpoint.as_mut() {
                endpoint.close();
            }
            self.state = EngineState::Stopped;
            return Ok(());
        }

        self.state = EngineState::Running;
        if let Some(core) = self.config.runtime.core_affinity {
            match pin_current_thread(core) {
                Ok(()) => info!("[Engine] root loop pinned to core {}", core),
                Err(e) => warn!("[Engine] running unpinned: {}", e),
            }
        }

        let halt = stop.child();
        let fault: Arc<Mutex<Option<TickError>>> = Arc::new(Mutex::new(None));
        let threshold = self.config.faults.max_consecutive_failures;
        let poll = self.config.stop_poll_interval();
        let max_catch_up = self.config.timing.max_catch_up_ticks;

        for local in &mut graph.locals {
            let Some(runner) = local.runner.take() else {
                continue;
            };
            let scope = format!("Local:{}", local.tag);
            let thread_halt = halt.clone();
            let thread_fault = Arc::clone(&fault);
            let rate_hz = local.rate_hz;
            let spawned = spawn_engine_thread(&format!("tg-local-{}", local.tag), None, move || {
                Ok(run_local(
                    runner,
                    rate_hz,
                    &scope,
                    threshold,
                    max_catch_up,
                    poll,
                    &thread_halt,
                    &thread_fault,
                ))
            });
            match spawned {
                Ok(handle) => local.thread = Some(handle),
                Err(e) => {
                    record_fault(&fault, e);
                    halt.set();
                }
            }
        }

        info!(
            "[Engine] running '{}' at {} Hz",
            graph.name, graph.root_rate_hz
        );
        self.root_ticks = 0;
        match graph.root.start() {
            Ok(()) => {
                let mut clock = TickClock::new(graph.root_rate_hz, max_catch_up);
                while !halt.is_set() {
                    let now = Instant::now();
                    for link in &mut graph.links {
                        link.receive(now);
                    }
                    if let Some(endpoint) = self.endpoint.as_mut() {
                        endpoint.receive(now);
                    }

                    clock.begin_tick();
                    if let Err(e) = graph.root.tick_contained(threshold, "Engine") {
                        error!("[Engine] fatal: {}", e);
                        record_fault(&fault, e);
                        halt.set();
                        break;
                    }

                    let now = Instant::now();
                    for link in &mut graph.links {
                        link.send(now);
                    }
                    if let Some(endpoint) = self.endpoint.as_mut() {
                        endpoint.send(now);
                    }
                    self.root_ticks += 1;
                    if let Some(hook) = self.tick_hook.as_mut() {
                        hook(self.root_ticks);
                    }

                    if !clock.wait_next(&halt, poll) {
                        break;
                    }
                }
                if clock.reanchors() > 0 {
                    debug!("[Engine] tick clock re-anchored {} times", clock.reanchors());
                }
            }
            Err(e) => {
                error!("[Engine] root failed to start: {}", e);
                record_fault(&fault, e);
            }
        }

        // Orderly shutdown: stop ticking everywhere, then reverse teardown
        halt.set();
        graph.root.stop();
        for local in &mut graph.locals {
            if let Some(handle) = local.thread.take() {
                match handle.join() {
                    Ok(Ok(runner)) => local.runner = Some(runner),
                    Ok(Err(e)) => record_fault(&fault, e),
                    Err(_) => record_fault(
                        &fault,
                        TickError::workload(&local.tag, "local sub-model thread panicked"),
                    ),
                }
            }
        }
        graph.teardown();
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.close();
        }
        self.state = EngineState::Stopped;

        let outcome = fault.lock().take();
        match outcome {
            Some(e) => {
                error!(
                    "[Engine] '{}' stopped on error after {} root ticks",
                    graph.name, self.root_ticks
                );
                Err(e)
            }
            None => {
                info!(
                    "[Engine] '{}' stopped cleanly after {} root ticks",
                    graph.name, self.root_ticks
                );
                Ok(())
            }
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn fingerprint(&self) -> Option<&str> {
        self.graph.as_ref().map(|g| g.fingerprint.as_str())
    }

    /// Shared handle to a port, e.g. `|spine|basex.inputs.motor1_speed`
    pub fn port(&self, path: &str) -> TickResult<PortHandle> {
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| TickError::EngineState("no model loaded".to_string()))?;
        let index = graph
            .block
            .lookup(path)
            .ok_or_else(|| TickError::UnresolvedPort {
                path: path.to_string(),
                reason: "no such port in the loaded model".to_string(),
            })?;
        Ok(PortHandle {
            block: Arc::clone(&graph.block),
            index,
        })
    }

    pub fn read_port(&self, path: &str) -> TickResult<PortValue> {
        Ok(self.port(path)?.get())
    }

    pub fn write_port(&self, path: &str, value: impl Into<PortValue>) -> TickResult<()> {
        self.port(path)?.set(value)
    }

    pub fn port_paths(&self) -> Vec<String> {
        self.graph
            .as_ref()
            .map(|g| g.block.paths().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> Vec<MetricsSnapshot> {
        self.graph
            .as_ref()
            .map(|g| {
                g.metrics
                    .iter()
                    .map(|(name, metrics)| metrics.snapshot(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn workload_metrics(&self, name: &str) -> Option<Arc<WorkloadMetrics>> {
        self.graph.as_ref().and_then(|g| {
            g.metrics
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, m)| Arc::clone(m))
        })
    }

    pub fn link_status(&self, tag: &str) -> Option<LinkStatus> {
        self.link_monitor(tag).map(|m| m.snapshot())
    }

    pub fn link_statuses(&self) -> Vec<LinkStatus> {
        let mut statuses: Vec<LinkStatus> = self
            .graph
            .iter()
            .flat_map(|g| g.links.iter().map(|l| l.status()))
            .collect();
        if let Some(endpoint) = &self.endpoint {
            statuses.push(endpoint.status());
        }
        statuses
    }

    /// Live counters for a link (or `serve` for the device endpoint),
    /// readable while `run` owns the engine
    pub fn link_monitor(&self, tag: &str) -> Option<Arc<LinkMonitor>> {
        if tag == "serve" {
            if let Some(endpoint) = &self.endpoint {
                return Some(endpoint.monitor());
            }
        }
        self.graph
            .as_ref()
            .and_then(|g| g.links.iter().find(|l| l.tag() == tag))
            .map(|l| l.monitor())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state == EngineState::Loaded {
            if let Some(graph) = self.graph.as_mut() {
                debug!("[Engine] dropping loaded engine '{}', tearing down", graph.name);
                graph.teardown();
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("model", &self.graph.as_ref().map(|g| g.name.as_str()))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn summarize(model: &Model, plan: &LoadPlan<'_>) -> ModelSummary {
    ModelSummary {
        name: model.name().to_string(),
        fingerprint: model.fingerprint(),
        root_rate_hz: plan.units.first().map(|u| u.root_rate()).unwrap_or(0.0),
        workloads: plan.units.iter().map(|u| u.model.seeds().len()).sum(),
        port_cells: plan.block.len(),
        bindings: plan.bindings.len(),
        local_models: plan.units.iter().filter_map(|u| u.tag.clone()).collect(),
        links: plan
            .links
            .iter()
            .map(|l| format!("{} @ {}", l.tag, l.address))
            .collect(),
    }
}

/// Instantiate, set up and assemble one unit's workload tree. Returns its root.
fn materialize(
    unit: &PlannedUnit<'_>,
    registry: &WorkloadRegistry,
    block: &Arc<PortBlock>,
    input_sources: &HashMap<usize, usize>,
    threshold: u32,
    metrics: &mut Vec<(String, Arc<WorkloadMetrics>)>,
) -> TickResult<WorkloadRunner> {
    let prefix = unit.prefix();
    let seeds = unit.model.seeds();
    let mut slots: Vec<Option<WorkloadRunner>> = (0..seeds.len()).map(|_| None).collect();

    // Construction order is the tree's pre-order
    for &index in &unit.topology.order {
        let seed = &seeds[index];
        let descriptor = registry.resolve(&seed.type_name)?;
        let span = unit.spans[index].clone();
        let sources = span
            .inputs
            .clone()
            .map(|cell| input_sources.get(&cell).copied().unwrap_or(cell))
            .collect();

        let created = descriptor.create(&seed.config).and_then(|workload| {
            let mut runner = WorkloadRunner::new(RunnerParts {
                name: format!("{}{}", prefix, seed.name),
                type_name: seed.type_name.clone(),
                workload,
                tick_rate_hz: unit.topology.rates[index],
                schema: Arc::clone(&descriptor.schema),
                block: Arc::clone(block),
                span,
                input_sources: sources,
            });
            runner.setup()?;
            Ok(runner)
        });
        match created {
            Ok(runner) => {
                metrics.push((runner.name().to_string(), runner.metrics()));
                slots[index] = Some(runner);
            }
            Err(e) => {
                error!("[Engine] '{}{}' failed to load: {}", prefix, seed.name, e);
                teardown_slots(&unit.topology.order, &mut slots);
                return Err(e);
            }
        }
    }

    // Children are handed to their group bottom-up
    for &index in unit.topology.order.iter().rev() {
        if !unit.topology.kinds[index].is_group() {
            continue;
        }
        let seed = &seeds[index];
        let mut children = Vec::with_capacity(seed.children.len());
        for child in &seed.children {
            match slots[child.index()].take() {
                Some(runner) => children.push(runner),
                None => {
                    teardown_slots(&unit.topology.order, &mut slots);
                    return Err(TickError::topology(format!(
                        "'{}' lost a child while assembling",
                        seed.name
                    )));
                }
            }
        }
        let attachment = GroupAttachment {
            group_name: format!("{}{}", prefix, seed.name),
            tick_rate_hz: unit.topology.rates[index],
            max_consecutive_failures: threshold,
            children,
        };
        let attached = match slots[index].as_mut() {
            Some(group) => group.attach_children(attachment),
            None => Err(TickError::topology(format!("'{}' is missing", seed.name))),
        };
        if let Err(e) = attached {
            teardown_slots(&unit.topology.order, &mut slots);
            return Err(e);
        }
    }

    let root = unit
        .model
        .root()
        .and_then(|root| slots[root.index()].take())
        .ok_or_else(|| TickError::NoRoot {
            model: unit.model.name().to_string(),
        })?;
    Ok(root)
}

fn teardown_slots(order: &[usize], slots: &mut [Option<WorkloadRunner>]) {
    for &index in order.iter().rev() {
        if let Some(runner) = slots[index].as_mut() {
            runner.teardown();
        }
    }
}

fn teardown_roots(roots: &mut [(Option<String>, f64, WorkloadRunner)]) {
    for (_, _, root) in roots.iter_mut().rev() {
        root.teardown();
    }
}

fn record_fault(slot: &Mutex<Option<TickError>>, error: TickError) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(error);
    }
}

/// Tick a `local` sub-model's root at its own rate until `halt` is set
#[allow(clippy::too_many_arguments)]
fn run_local(
    mut runner: WorkloadRunner,
    rate_hz: f64,
    scope: &str,
    threshold: u32,
    max_catch_up: u32,
    poll: std::time::Duration,
    halt: &StopFlag,
    fault: &Mutex<Option<TickError>>,
) -> WorkloadRunner {
    if let Err(e) = runner.start() {
        error!("[{}] root failed to start: {}", scope, e);
        record_fault(fault, e);
        halt.set();
        return runner;
    }
    debug!("[{}] running at {} Hz", scope, rate_hz);

    let mut clock = TickClock::new(rate_hz, max_catch_up);
    while !halt.is_set() {
        clock.begin_tick();
        if let Err(e) = runner.tick_contained(threshold, scope) {
            error!("[{}] fatal: {}", scope, e);
            record_fault(fault, e);
            halt.set();
            break;
        }
        if !clock.wait_next(halt, poll) {
            break;
        }
    }
    runner.stop();
    runner
}

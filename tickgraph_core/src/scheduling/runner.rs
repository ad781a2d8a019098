use crate::core::{
    PortSchema, PortValue, SetupContext, TickContext, Workload, WorkloadMetrics, WorkloadState,
};
use crate::error::{TickError, TickResult};
use crate::memory::{PortBlock, PortSpan};
use crate::scheduling::clock::period_from_hz;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runtime materialization of one seed: the workload object, its slice of
/// the port block and the bindings feeding its inputs.
pub struct WorkloadRunner {
    name: String,
    type_name: String,
    workload: Box<dyn Workload>,
    tick_rate_hz: f64,
    period: Duration,
    schema: Arc<PortSchema>,
    block: Arc<PortBlock>,
    span: PortSpan,
    /// Cell each input is latched from; the input's own cell when unbound
    input_sources: Vec<usize>,
    input_scratch: Vec<PortValue>,
    output_scratch: Vec<PortValue>,
    metrics: Arc<WorkloadMetrics>,
    state: WorkloadState,
    tick_index: u64,
    last_tick: Option<Instant>,
}

pub(crate) struct RunnerParts {
    pub name: String,
    pub type_name: String,
    pub workload: Box<dyn Workload>,
    pub tick_rate_hz: f64,
    pub schema: Arc<PortSchema>,
    pub block: Arc<PortBlock>,
    pub span: PortSpan,
    pub input_sources: Vec<usize>,
}

impl WorkloadRunner {
    pub(crate) fn new(parts: RunnerParts) -> Self {
        let input_scratch = parts.schema.inputs.iter().map(|p| p.default.clone()).collect();
        let output_scratch = parts
            .schema
            .outputs
            .iter()
            .map(|p| p.default.clone())
            .collect();
        Self {
            name: parts.name,
            type_name: parts.type_name,
            workload: parts.workload,
            tick_rate_hz: parts.tick_rate_hz,
            period: period_from_hz(parts.tick_rate_hz),
            schema: parts.schema,
            block: parts.block,
            span: parts.span,
            input_sources: parts.input_sources,
            input_scratch,
            output_scratch,
            metrics: Arc::new(WorkloadMetrics::default()),
            state: WorkloadState::Created,
            tick_index: 0,
            last_tick: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn tick_rate_hz(&self) -> f64 {
        self.tick_rate_hz
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> &WorkloadState {
        &self.state
    }

    pub fn metrics(&self) -> Arc<WorkloadMetrics> {
        Arc::clone(&self.metrics)
    }

    pub(crate) fn attach_children(
        &mut self,
        attachment: crate::core::GroupAttachment,
    ) -> TickResult<()> {
        self.workload.attach_children(attachment)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub(crate) fn setup(&mut self) -> TickResult<()> {
        let ctx = SetupContext {
            name: &self.name,
            type_name: &self.type_name,
            tick_rate_hz: self.tick_rate_hz,
            schema: &self.schema,
        };
        match self.workload.setup(&ctx) {
            Ok(()) => {
                self.state = WorkloadState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = WorkloadState::Faulted(e.to_string());
                Err(TickError::workload(&self.name, format!("setup failed: {}", e)))
            }
        }
    }

    pub(crate) fn start(&mut self) -> TickResult<()> {
        self.last_tick = None;
        self.workload
            .start()
            .map_err(|e| TickError::workload(&self.name, format!("start failed: {}", e)))?;
        self.state = WorkloadState::Running;
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        if self.state == WorkloadState::Running {
            self.workload.stop();
            self.state = WorkloadState::Stopped;
        }
    }

    pub(crate) fn teardown(&mut self) {
        if self.state == WorkloadState::TornDown {
            return;
        }
        if let Err(e) = self.workload.teardown() {
            log::warn!("[Engine] teardown of '{}' failed: {}", self.name, e);
        }
        self.state = WorkloadState::TornDown;
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Latch inputs, run one tick and publish outputs if it succeeded.
    /// A panic inside the workload is returned as a workload error.
    pub fn tick(&mut self) -> TickResult<()> {
        let now = Instant::now();
        let dt = match self.last_tick {
            Some(last) => now - last,
            None => self.period,
        };
        self.last_tick = Some(now);

        self.latch();

        let started = Instant::now();
        let outcome = {
            let Self {
                name,
                workload,
                schema,
                input_scratch,
                output_scratch,
                tick_index,
                ..
            } = self;
            panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = TickContext::new(
                    name.as_str(),
                    dt,
                    *tick_index,
                    &**schema,
                    input_scratch.as_slice(),
                    output_scratch.as_mut_slice(),
                );
                workload.tick(&mut ctx)
            }))
        };
        let elapsed = started.elapsed();
        self.tick_index += 1;

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(TickError::workload(
                &self.name,
                format!("panicked: {}", panic_message(payload.as_ref())),
            )),
        };

        match &result {
            Ok(()) => self.publish(),
            Err(_) => self.discard_staged(),
        }
        self.metrics.record_tick(elapsed, result.is_ok());
        if !self.period.is_zero() && elapsed > self.period {
            self.metrics.record_overrun();
            log::debug!(
                "[Engine] '{}' tick took {:?}, over its {:?} period",
                self.name,
                elapsed,
                self.period
            );
        }
        result
    }

    /// Tick with fault containment: non-fatal failures are logged and
    /// swallowed until `threshold` consecutive failures, which escalate to
    /// [`TickError::FaultThreshold`]. Fatal errors from nested groups pass
    /// through untouched.
    pub(crate) fn tick_contained(&mut self, threshold: u32, scope: &str) -> TickResult<()> {
        match self.tick() {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let failures = self.metrics.consecutive_failures();
                log::warn!(
                    "[{}] '{}' tick failed ({} consecutive): {}",
                    scope,
                    self.name,
                    failures,
                    e
                );
                if threshold > 0 && failures >= threshold {
                    log::error!(
                        "[{}] '{}' reached {} consecutive failures, escalating",
                        scope,
                        self.name,
                        failures
                    );
                    self.state = WorkloadState::Faulted(e.to_string());
                    return Err(TickError::FaultThreshold {
                        workload: self.name.clone(),
                        failures,
                    });
                }
                Ok(())
            }
        }
    }

    fn latch(&mut self) {
        for (i, &source) in self.input_sources.iter().enumerate() {
            let own = self.span.inputs.start + i;
            if source != own {
                self.block.copy(source, own);
            }
            self.block.read_into(own, &mut self.input_scratch[i]);
        }
    }

    fn publish(&mut self) {
        for (i, value) in self.output_scratch.iter().enumerate() {
            self.block.set(self.span.outputs.start + i, value);
        }
    }

    fn discard_staged(&mut self) {
        for (i, value) in self.output_scratch.iter_mut().enumerate() {
            self.block.read_into(self.span.outputs.start + i, value);
        }
    }
}

impl std::fmt::Debug for WorkloadRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRunner")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("tick_rate_hz", &self.tick_rate_hz)
            .field("state", &self.state)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::memory::PortBlockBuilder;

    /// Stand-alone runner over its own port block
    pub fn runner(name: &str, hz: f64, schema: PortSchema, workload: Box<dyn Workload>) -> WorkloadRunner {
        let mut builder = PortBlockBuilder::new();
        let span = builder.push_workload("", name, &schema);
        let input_sources = span.inputs.clone().collect();
        WorkloadRunner::new(RunnerParts {
            name: name.to_string(),
            type_name: "TestWorkload".to_string(),
            workload,
            tick_rate_hz: hz,
            schema: Arc::new(schema),
            block: Arc::new(builder.build()),
            span,
            input_sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::runner;
    use super::*;
    use crate::core::PortType;

    struct Doubler;

    impl Workload for Doubler {
        fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
            let x = ctx.input_f64("x")?;
            if x < 0.0 {
                ctx.set_output("y", 99.0)?;
                return Err(TickError::workload(ctx.name(), "negative input"));
            }
            if x > 100.0 {
                panic!("too large");
            }
            ctx.set_output("y", x * 2.0)
        }
    }

    fn doubler() -> WorkloadRunner {
        let schema = PortSchema::new()
            .input("x", PortType::F64)
            .output("y", PortType::F64);
        runner("doubler", 100.0, schema, Box::new(Doubler))
    }

    #[test]
    fn test_tick_latches_and_publishes() {
        let mut r = doubler();
        let block = Arc::clone(&r.block);
        block.set(0, &PortValue::F64(2.0));
        r.tick().unwrap();
        assert_eq!(block.get(1), PortValue::F64(4.0));
        assert_eq!(r.metrics().ticks(), 1);
    }

    #[test]
    fn test_failed_tick_does_not_publish() {
        let mut r = doubler();
        let block = Arc::clone(&r.block);
        block.set(0, &PortValue::F64(1.0));
        r.tick().unwrap();
        block.set(0, &PortValue::F64(-1.0));
        assert!(r.tick().is_err());
        assert_eq!(block.get(1), PortValue::F64(2.0));
    }

    #[test]
    fn test_panic_becomes_error() {
        let mut r = doubler();
        r.block.set(0, &PortValue::F64(1000.0));
        let err = r.tick().unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_contained_failures_escalate_at_threshold() {
        let mut r = doubler();
        r.block.set(0, &PortValue::F64(-1.0));
        assert!(r.tick_contained(3, "test").is_ok());
        assert!(r.tick_contained(3, "test").is_ok());
        let err = r.tick_contained(3, "test").unwrap_err();
        assert!(err.is_fatal());

        // a success in between resets the streak
        let mut r = doubler();
        r.block.set(0, &PortValue::F64(-1.0));
        r.tick_contained(2, "test").unwrap();
        r.block.set(0, &PortValue::F64(1.0));
        r.tick_contained(2, "test").unwrap();
        r.block.set(0, &PortValue::F64(-1.0));
        assert!(r.tick_contained(2, "test").is_ok());
    }
}

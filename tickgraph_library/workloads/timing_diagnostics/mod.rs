use tickgraph_core::{
    PortSchema, PortType, SetupContext, TickContext, TickError, TickResult, Workload,
    WorkloadConfig, WorkloadType,
};

/// Timing Diagnostics Workload
///
/// Measures the interval between its own ticks and publishes it alongside
/// a smoothed rate and the jitter against the configured period.
///
/// # Ports
/// - outputs: `dt_ms`, `rate_hz`, `jitter_ms` (f64), `late_ticks` (i64)
///
/// # Configuration
/// - `smoothing`: weight of the newest sample in the rate average (default 0.1)
/// - `late_threshold`: a tick counts as late when its interval exceeds this
///   multiple of the period (default 1.5)
#[derive(Debug)]
pub struct TimingDiagnosticsWorkload {
    smoothing: f64,
    late_threshold: f64,
    period_ms: f64,
    rate_hz: Option<f64>,
    late_ticks: i64,
    name: String,
}

/// One tick's measurements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSample {
    pub dt_ms: f64,
    pub rate_hz: f64,
    pub jitter_ms: f64,
    pub late: bool,
}

impl TimingDiagnosticsWorkload {
    pub fn new(smoothing: f64, late_threshold: f64) -> Self {
        Self {
            smoothing,
            late_threshold,
            period_ms: 0.0,
            rate_hz: None,
            late_ticks: 0,
            name: String::new(),
        }
    }

    pub fn observe(&mut self, dt_ms: f64) -> TimingSample {
        let instant_hz = if dt_ms > 0.0 { 1000.0 / dt_ms } else { 0.0 };
        let rate_hz = match self.rate_hz {
            Some(previous) => previous + self.smoothing * (instant_hz - previous),
            None => instant_hz,
        };
        self.rate_hz = Some(rate_hz);

        let late = self.period_ms > 0.0 && dt_ms > self.period_ms * self.late_threshold;
        if late {
            self.late_ticks += 1;
        }
        TimingSample {
            dt_ms,
            rate_hz,
            jitter_ms: (dt_ms - self.period_ms).abs(),
            late,
        }
    }
}

impl Workload for TimingDiagnosticsWorkload {
    fn setup(&mut self, ctx: &SetupContext<'_>) -> TickResult<()> {
        self.name = ctx.name.to_string();
        if ctx.tick_rate_hz > 0.0 {
            self.period_ms = 1000.0 / ctx.tick_rate_hz;
        }
        Ok(())
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        let sample = self.observe(ctx.dt_secs() * 1000.0);
        if sample.late {
            log::debug!(
                "[{}] late tick: {:.2}ms against a {:.2}ms period",
                self.name,
                sample.dt_ms,
                self.period_ms
            );
        }
        ctx.set_output("dt_ms", sample.dt_ms)?;
        ctx.set_output("rate_hz", sample.rate_hz)?;
        ctx.set_output("jitter_ms", sample.jitter_ms)?;
        ctx.set_output("late_ticks", self.late_ticks)
    }

    fn teardown(&mut self) -> TickResult<()> {
        if let Some(rate) = self.rate_hz {
            log::info!(
                "[{}] final rate {:.1} Hz, {} late ticks",
                self.name,
                rate,
                self.late_ticks
            );
        }
        Ok(())
    }
}

impl WorkloadType for TimingDiagnosticsWorkload {
    const TYPE_NAME: &'static str = "TimingDiagnosticsWorkload";

    fn ports() -> PortSchema {
        PortSchema::new()
            .output("dt_ms", PortType::F64)
            .output("rate_hz", PortType::F64)
            .output("jitter_ms", PortType::F64)
            .output("late_ticks", PortType::I64)
    }

    fn create(config: &WorkloadConfig) -> TickResult<Self> {
        let smoothing = config.get_f64("smoothing")?.unwrap_or(0.1);
        if !(smoothing > 0.0 && smoothing <= 1.0) {
            return Err(TickError::config(format!(
                "TimingDiagnosticsWorkload: smoothing must be within (0, 1], got {}",
                smoothing
            )));
        }
        let late_threshold = config.get_f64("late_threshold")?.unwrap_or(1.5);
        Ok(Self::new(smoothing, late_threshold))
    }
}

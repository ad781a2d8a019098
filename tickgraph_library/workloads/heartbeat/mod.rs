use tickgraph_core::{
    PortSchema, PortType, TickContext, TickError, TickResult, Workload, WorkloadConfig,
    WorkloadType,
};

/// Heartbeat Workload
///
/// Produces a steady beat for status displays and liveness checks. `phase`
/// ramps from 0 to 1 over one beat; `beats` counts completed beats.
///
/// # Configuration
/// - `bpm`: beats per minute (default 60)
///
/// # Example
/// ```rust,ignore
/// let heart = model.add_with_rate("HeartbeatWorkload", "heart_ui", 15.0)?;
/// model.set_config(heart, "bpm", "72")?;
/// ```
#[derive(Debug)]
pub struct HeartbeatWorkload {
    bpm: f64,
    phase: f64,
    beats: i64,
}

impl HeartbeatWorkload {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            phase: 0.0,
            beats: 0,
        }
    }

    /// Move the phase forward by `dt_secs` and return completed beats
    fn advance(&mut self, dt_secs: f64) -> i64 {
        self.phase += dt_secs * self.bpm / 60.0;
        let completed = self.phase.floor();
        self.phase -= completed;
        completed as i64
    }
}

impl Workload for HeartbeatWorkload {
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        let completed = self.advance(ctx.dt_secs());
        if completed > 0 {
            self.beats += completed;
            log::trace!("[{}] beat {}", ctx.name(), self.beats);
        }
        ctx.set_output("beats", self.beats)?;
        ctx.set_output("phase", self.phase as f32)
    }
}

impl WorkloadType for HeartbeatWorkload {
    const TYPE_NAME: &'static str = "HeartbeatWorkload";

    fn ports() -> PortSchema {
        PortSchema::new()
            .output("beats", PortType::I64)
            .output("phase", PortType::F32)
    }

    fn default_tick_rate_hz() -> Option<f64> {
        Some(15.0)
    }

    fn create(config: &WorkloadConfig) -> TickResult<Self> {
        let bpm = config.get_f64("bpm")?.unwrap_or(60.0);
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(TickError::config(format!(
                "HeartbeatWorkload: bpm must be positive, got {}",
                bpm
            )));
        }
        Ok(Self::new(bpm))
    }
}

use tickgraph_core::{
    PortSchema, PortType, PortValue, SetupContext, TickContext, TickResult, Workload,
    WorkloadConfig, WorkloadType,
};

const CHANNELS: [&str; 4] = ["speed", "turn_rate", "left_motor", "right_motor"];

/// Console Telemetry Workload
///
/// Logs its inputs at its own (usually slow) tick rate. Unconnected inputs
/// show their defaults.
#[derive(Debug, Default)]
pub struct ConsoleTelemetryWorkload {
    name: String,
    lines: u64,
}

impl ConsoleTelemetryWorkload {
    pub fn lines(&self) -> u64 {
        self.lines
    }
}

pub fn format_line(values: &[(&str, &PortValue)]) -> String {
    values
        .iter()
        .map(|(name, value)| match value.as_f64() {
            Some(v) => format!("{}={:+.3}", name, v),
            None => format!("{}={}", name, value),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Workload for ConsoleTelemetryWorkload {
    fn setup(&mut self, ctx: &SetupContext<'_>) -> TickResult<()> {
        self.name = ctx.name.to_string();
        Ok(())
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        let mut values = Vec::with_capacity(CHANNELS.len());
        for channel in CHANNELS {
            values.push((channel, ctx.input(channel)?));
        }
        self.lines += 1;
        log::info!("[{}] {}", self.name, format_line(&values));
        Ok(())
    }
}

impl WorkloadType for ConsoleTelemetryWorkload {
    const TYPE_NAME: &'static str = "ConsoleTelemetryWorkload";

    fn ports() -> PortSchema {
        let mut schema = PortSchema::new();
        for channel in CHANNELS {
            schema = schema.input(channel, PortType::F32);
        }
        schema
    }

    fn default_tick_rate_hz() -> Option<f64> {
        Some(5.0)
    }

    fn create(_config: &WorkloadConfig) -> TickResult<Self> {
        Ok(Self::default())
    }
}

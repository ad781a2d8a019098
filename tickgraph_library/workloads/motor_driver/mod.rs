use tickgraph_core::{
    PortSchema, PortType, SetupContext, TickContext, TickError, TickResult, Workload,
    WorkloadConfig, WorkloadType,
};

pub const MOTOR_COUNT: usize = 4;

const SPEED_INPUTS: [&str; MOTOR_COUNT] =
    ["motor1_speed", "motor2_speed", "motor3_speed", "motor4_speed"];
const APPLIED_OUTPUTS: [&str; MOTOR_COUNT] = [
    "motor1_applied",
    "motor2_applied",
    "motor3_applied",
    "motor4_applied",
];

/// Motor Driver Workload
///
/// Four-channel motor controller front end. Commanded speeds are limited,
/// passed through a deadband and reported back as the applied value, which
/// is what a hardware backend would write to the controller.
///
/// # Configuration
/// - `max_speed`: symmetric limit applied to every channel (default 1.0)
/// - `deadband`: commands with a smaller magnitude are applied as 0 (default 0.0)
#[derive(Debug)]
pub struct MotorDriverWorkload {
    max_speed: f32,
    deadband: f32,
    applied: [f32; MOTOR_COUNT],
    name: String,
}

impl MotorDriverWorkload {
    pub fn new(max_speed: f32, deadband: f32) -> Self {
        Self {
            max_speed,
            deadband,
            applied: [0.0; MOTOR_COUNT],
            name: String::new(),
        }
    }

    pub fn shape(&self, command: f32) -> f32 {
        if !command.is_finite() || command.abs() < self.deadband {
            return 0.0;
        }
        command.clamp(-self.max_speed, self.max_speed)
    }

    pub fn applied(&self) -> [f32; MOTOR_COUNT] {
        self.applied
    }
}

impl Workload for MotorDriverWorkload {
    fn setup(&mut self, ctx: &SetupContext<'_>) -> TickResult<()> {
        self.name = ctx.name.to_string();
        log::info!(
            "[{}] {} channels, limit {}, deadband {}",
            self.name,
            MOTOR_COUNT,
            self.max_speed,
            self.deadband
        );
        Ok(())
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        for channel in 0..MOTOR_COUNT {
            let command = ctx.input_f32(SPEED_INPUTS[channel])?;
            self.applied[channel] = self.shape(command);
            ctx.set_output(APPLIED_OUTPUTS[channel], self.applied[channel])?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.applied = [0.0; MOTOR_COUNT];
        log::info!("[{}] all channels released", self.name);
    }
}

impl WorkloadType for MotorDriverWorkload {
    const TYPE_NAME: &'static str = "MotorDriverWorkload";

    fn ports() -> PortSchema {
        let mut schema = PortSchema::new();
        for input in SPEED_INPUTS {
            schema = schema.input(input, PortType::F32);
        }
        for output in APPLIED_OUTPUTS {
            schema = schema.output(output, PortType::F32);
        }
        schema
    }

    fn default_tick_rate_hz() -> Option<f64> {
        Some(30.0)
    }

    fn create(config: &WorkloadConfig) -> TickResult<Self> {
        let max_speed = config.get_f64("max_speed")?.unwrap_or(1.0) as f32;
        let deadband = config.get_f64("deadband")?.unwrap_or(0.0) as f32;
        let valid = max_speed > 0.0 && deadband >= 0.0 && deadband < max_speed;
        if !valid {
            return Err(TickError::config(format!(
                "MotorDriverWorkload: need 0 <= deadband < max_speed, got deadband {} max_speed {}",
                deadband, max_speed
            )));
        }
        Ok(Self::new(max_speed, deadband))
    }
}

use tickgraph_core::{
    PortSchema, PortType, TickContext, TickResult, Workload, WorkloadConfig, WorkloadType,
};

/// Steering Mixer Workload
///
/// Differential (tank) mixing of a forward speed and a turn rate into left
/// and right motor commands. Both outputs are clamped to [-1, 1].
///
/// # Ports
/// - inputs: `speed`, `turn_rate` (f32, nominally -1..1)
/// - outputs: `left_motor`, `right_motor` (f32)
///
/// # Configuration
/// - `turn_gain`: scale applied to `turn_rate` (default 1.0)
/// - `normalize`: scale both sides down together instead of clipping each
///   (default false)
#[derive(Debug, Clone)]
pub struct SteeringMixerWorkload {
    turn_gain: f32,
    normalize: bool,
}

impl Default for SteeringMixerWorkload {
    fn default() -> Self {
        Self {
            turn_gain: 1.0,
            normalize: false,
        }
    }
}

impl SteeringMixerWorkload {
    pub fn mix(&self, speed: f32, turn_rate: f32) -> (f32, f32) {
        let turn = turn_rate * self.turn_gain;
        let left = speed + turn;
        let right = speed - turn;
        if self.normalize {
            let peak = left.abs().max(right.abs());
            if peak > 1.0 {
                return (left / peak, right / peak);
            }
        }
        (left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0))
    }
}

impl Workload for SteeringMixerWorkload {
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        let speed = ctx.input_f32("speed")?;
        let turn_rate = ctx.input_f32("turn_rate")?;
        let (left, right) = self.mix(speed, turn_rate);
        ctx.set_output("left_motor", left)?;
        ctx.set_output("right_motor", right)
    }
}

impl WorkloadType for SteeringMixerWorkload {
    const TYPE_NAME: &'static str = "SteeringMixerWorkload";

    fn ports() -> PortSchema {
        PortSchema::new()
            .input("speed", PortType::F32)
            .input("turn_rate", PortType::F32)
            .output("left_motor", PortType::F32)
            .output("right_motor", PortType::F32)
    }

    fn default_tick_rate_hz() -> Option<f64> {
        Some(30.0)
    }

    fn create(config: &WorkloadConfig) -> TickResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            turn_gain: config
                .get_f64("turn_gain")?
                .map(|g| g as f32)
                .unwrap_or(defaults.turn_gain),
            normalize: config.get_bool("normalize")?.unwrap_or(defaults.normalize),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_and_spin() {
        let mixer = SteeringMixerWorkload::default();
        assert_eq!(mixer.mix(0.5, 0.0), (0.5, 0.5));
        assert_eq!(mixer.mix(0.0, 0.5), (0.5, -0.5));
    }

    #[test]
    fn test_outputs_are_clamped() {
        let mixer = SteeringMixerWorkload::default();
        assert_eq!(mixer.mix(1.0, 1.0), (1.0, 0.0));
        assert_eq!(mixer.mix(-1.0, 0.5), (-0.5, -1.0));
    }

    #[test]
    fn test_normalize_keeps_ratio() {
        let config = WorkloadConfig::new().with("normalize", "true");
        let mixer = SteeringMixerWorkload::create(&config).unwrap();
        let (left, right) = mixer.mix(1.0, 1.0);
        assert_eq!(left, 1.0);
        assert_eq!(right, 0.0);
        let (left, right) = mixer.mix(0.8, 0.4);
        assert!((left - 1.0).abs() < 1e-6);
        assert!((right - 0.4 / 1.2).abs() < 1e-6);
    }
}

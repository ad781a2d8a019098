use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;
use tickgraph_core::{
    PortSchema, PortType, TickContext, TickError, TickResult, Workload, WorkloadConfig,
    WorkloadType,
};

const STICK_OUTPUTS: [&str; 4] = ["left.x", "left.y", "right.x", "right.y"];

/// How the synthetic sticks move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickPattern {
    /// All axes centred
    Idle,
    /// Steady forward push on `left.y` while `left.x` sweeps a sine
    Sweep,
    /// Bounded random walk on every axis
    Wander,
}

impl FromStr for StickPattern {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "sweep" => Ok(Self::Sweep),
            "wander" => Ok(Self::Wander),
            other => Err(TickError::config(format!(
                "RemoteControlWorkload: unknown pattern '{}' (idle, sweep, wander)",
                other
            ))),
        }
    }
}

impl fmt::Display for StickPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sweep => write!(f, "sweep"),
            Self::Wander => write!(f, "wander"),
        }
    }
}

/// Remote Control Workload
///
/// Stand-in for an operator's two-stick controller. Outputs `left.x`,
/// `left.y`, `right.x` and `right.y` in [-1, 1], generated from a synthetic
/// pattern so a full host/device topology can run without an input device.
///
/// # Configuration
/// - `pattern`: `idle`, `sweep` (default) or `wander`
/// - `amplitude`: peak stick deflection (default 0.5)
/// - `period_secs`: sweep period (default 4.0)
/// - `seed`: random seed for `wander` (default 0)
pub struct RemoteControlWorkload {
    pattern: StickPattern,
    amplitude: f64,
    period_secs: f64,
    elapsed_secs: f64,
    sticks: [f64; 4],
    rng: StdRng,
}

impl RemoteControlWorkload {
    pub fn new(pattern: StickPattern, amplitude: f64, period_secs: f64, seed: u64) -> Self {
        Self {
            pattern,
            amplitude,
            period_secs,
            elapsed_secs: 0.0,
            sticks: [0.0; 4],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sticks(&self) -> [f64; 4] {
        self.sticks
    }

    fn advance(&mut self, dt_secs: f64) {
        self.elapsed_secs += dt_secs;
        match self.pattern {
            StickPattern::Idle => self.sticks = [0.0; 4],
            StickPattern::Sweep => {
                let angle = TAU * self.elapsed_secs / self.period_secs;
                self.sticks = [self.amplitude * angle.sin(), self.amplitude, 0.0, 0.0];
            }
            StickPattern::Wander => {
                let step = self.amplitude * dt_secs;
                for axis in self.sticks.iter_mut() {
                    let nudge: f64 = self.rng.gen_range(-1.0..=1.0);
                    *axis = (*axis + nudge * step).clamp(-self.amplitude, self.amplitude);
                }
            }
        }
    }
}

impl fmt::Debug for RemoteControlWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteControlWorkload")
            .field("pattern", &self.pattern)
            .field("amplitude", &self.amplitude)
            .field("sticks", &self.sticks)
            .finish_non_exhaustive()
    }
}

impl Workload for RemoteControlWorkload {
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> TickResult<()> {
        self.advance(ctx.dt_secs());
        for (output, value) in STICK_OUTPUTS.iter().zip(self.sticks) {
            ctx.set_output(output, value as f32)?;
        }
        Ok(())
    }
}

impl WorkloadType for RemoteControlWorkload {
    const TYPE_NAME: &'static str = "RemoteControlWorkload";

    fn ports() -> PortSchema {
        let mut schema = PortSchema::new();
        for output in STICK_OUTPUTS {
            schema = schema.output(output, PortType::F32);
        }
        schema
    }

    fn default_tick_rate_hz() -> Option<f64> {
        Some(30.0)
    }

    fn create(config: &WorkloadConfig) -> TickResult<Self> {
        let pattern = match config.get_str("pattern") {
            Some(raw) => raw.parse()?,
            None => StickPattern::Sweep,
        };
        let amplitude = config.get_f64("amplitude")?.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&amplitude) {
            return Err(TickError::config(format!(
                "RemoteControlWorkload: amplitude must be within 0..=1, got {}",
                amplitude
            )));
        }
        let period_secs = config.get_f64("period_secs")?.unwrap_or(4.0);
        if !period_secs.is_finite() || period_secs <= 0.0 {
            return Err(TickError::config(format!(
                "RemoteControlWorkload: period_secs must be positive, got {}",
                period_secs
            )));
        }
        let seed = config.get_u64("seed")?.unwrap_or(0);
        Ok(Self::new(pattern, amplitude, period_secs, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_pushes_forward_and_steers() {
        let mut remote = RemoteControlWorkload::new(StickPattern::Sweep, 0.5, 4.0, 0);
        remote.advance(1.0);
        let [x, y, rx, ry] = remote.sticks();
        assert!((x - 0.5).abs() < 1e-9, "quarter period is the sine peak");
        assert_eq!(y, 0.5);
        assert_eq!((rx, ry), (0.0, 0.0));
    }

    #[test]
    fn test_wander_stays_within_amplitude_and_is_seeded() {
        let mut a = RemoteControlWorkload::new(StickPattern::Wander, 0.3, 4.0, 7);
        let mut b = RemoteControlWorkload::new(StickPattern::Wander, 0.3, 4.0, 7);
        for _ in 0..500 {
            a.advance(0.1);
            b.advance(0.1);
            assert!(a.sticks().iter().all(|v| v.abs() <= 0.3));
        }
        assert_eq!(a.sticks(), b.sticks());
    }

    #[test]
    fn test_pattern_parsing() {
        assert_eq!("idle".parse::<StickPattern>().unwrap(), StickPattern::Idle);
        let config = WorkloadConfig::new().with("pattern", "zigzag");
        assert!(RemoteControlWorkload::create(&config)
            .unwrap_err()
            .is_configuration());
    }
}

pub mod pick_place_cube;
pub mod view;

use std::collections::BTreeMap;
use std::time::Duration;

use candle_core::Tensor;
use clap::ValueEnum;
use rand::Rng;

use crate::error::{RecordError, RecordResult};
use pick_place_cube::PickPlaceCube;

pub const PICK_PLACE_CUBE: &str = "PickPlaceCube-v0";

/// Named arrays produced by the simulator at each step.
///
/// Rank-1 tensors are state vectors, rank-3 tensors are HWC `u8` camera frames.
pub type Observation = BTreeMap<String, Tensor>;

/// Shape of every observation key, in key order.
pub type ObservationSpace = BTreeMap<String, Vec<usize>>;

/// Box-shaped continuous action space.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpace {
    pub low: Vec<f32>,
    pub high: Vec<f32>,
}

impl ActionSpace {
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Self {
        debug_assert_eq!(low.len(), high.len());
        Self { low, high }
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Uniform sample inside the box.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&l, &h)| rng.gen_range(l..=h))
            .collect()
    }

    pub fn contains(&self, action: &[f32]) -> bool {
        action.len() == self.dim()
            && action
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(a, (l, h))| a >= l && a <= h)
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    /// simulated time after the step, in seconds
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderMode {
    /// draw every frame in the terminal
    Human,
    #[value(name = "none")]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationMode {
    State,
    /// state vectors plus camera frames
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    /// target end-effector position plus gripper command
    EndEffector,
}

/// Visual prop placed in the scene for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeProp {
    Red,
    Green,
    Blue,
}

impl CubeProp {
    pub fn rgb(self) -> [u8; 3] {
        match self {
            CubeProp::Red => [220, 40, 40],
            CubeProp::Green => [40, 200, 60],
            CubeProp::Blue => [50, 80, 230],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CubeProp::Red => "red_cube",
            CubeProp::Green => "green_cube",
            CubeProp::Blue => "blue_cube",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropConfig {
    pub cube: CubeProp,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvConfig {
    pub observation_mode: ObservationMode,
    pub action_mode: ActionMode,
    pub render_mode: RenderMode,
    pub prop: PropConfig,
    /// randomizes the cube start pose on every reset; fixed pose when unset
    pub seed: Option<u64>,
}

impl EnvConfig {
    pub fn new(prop: PropConfig, render_mode: RenderMode) -> Self {
        Self {
            observation_mode: ObservationMode::Both,
            action_mode: ActionMode::EndEffector,
            render_mode,
            prop,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

pub trait Environment {
    fn observation_space(&self) -> &ObservationSpace;

    fn action_space(&self) -> &ActionSpace;

    /// Restart the scene and return the initial observation.
    fn reset(&mut self) -> RecordResult<Observation>;

    fn step(&mut self, action: &[f32]) -> RecordResult<StepOutcome>;

    /// Draw the current frame for on-screen display.
    fn render(&mut self) -> RecordResult<()>;

    /// Simulated time covered by one step. Live control runs at this rate.
    fn control_period(&self) -> Duration;
}

/// Names accepted by [`make`].
pub const REGISTERED_ENVS: &[&str] = &[PICK_PLACE_CUBE];

pub fn ensure_registered(env_name: &str) -> RecordResult<()> {
    if REGISTERED_ENVS.contains(&env_name) {
        Ok(())
    } else {
        Err(RecordError::UnknownEnvironment(env_name.to_string()))
    }
}

/// Construct a registered environment by name.
pub fn make(env_name: &str, config: EnvConfig) -> RecordResult<Box<dyn Environment>> {
    match env_name {
        PICK_PLACE_CUBE => Ok(Box::new(PickPlaceCube::new(config)?)),
        other => Err(RecordError::UnknownEnvironment(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sample_stays_inside_space() {
        let space = ActionSpace::new(vec![-1.0, 0.0], vec![1.0, 0.5]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(space.contains(&space.sample(&mut rng)));
        }
    }

    #[test]
    fn contains_checks_dimension_and_bounds() {
        let space = ActionSpace::new(vec![0.0, 0.0], vec![1.0, 1.0]);
        assert!(space.contains(&[0.0, 1.0]));
        assert!(!space.contains(&[0.0]));
        assert!(!space.contains(&[0.5, 1.01]));
    }

    #[test]
    fn make_rejects_unknown_environment() {
        let config = EnvConfig::new(
            PropConfig {
                cube: CubeProp::Red,
            },
            RenderMode::Off,
        );
        match make("CartPole-v1", config) {
            Err(RecordError::UnknownEnvironment(name)) => assert_eq!(name, "CartPole-v1"),
            _ => panic!("expected UnknownEnvironment"),
        }
        assert!(make(PICK_PLACE_CUBE, config).is_ok());
        assert!(ensure_registered(PICK_PLACE_CUBE).is_ok());
        assert!(ensure_registered("CartPole-v1").is_err());
    }
}

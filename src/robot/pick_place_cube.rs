use std::time::Duration;

use candle_core::{Device, Tensor};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::view::{SceneSnapshot, TerminalView};
use super::{
    ActionSpace, EnvConfig, Environment, Observation, ObservationMode, ObservationSpace,
    RenderMode, StepOutcome,
};
use crate::error::{RecordError, RecordResult};

/// Simulation step, seconds
pub const DT: f64 = 1.0 / 30.0;

pub const IMAGE_HEIGHT: usize = 48;
pub const IMAGE_WIDTH: usize = 64;

/// Workspace of the end effector: x, y, z (m) and gripper command.
const ACTION_LOW: [f32; 4] = [-0.25, 0.0, 0.0, -1.0];
const ACTION_HIGH: [f32; 4] = [0.25, 0.4, 0.3, 1.0];

const HOME_EE: [f32; 3] = [0.0, 0.14, 0.17];
const CUBE_START: [f32; 2] = [0.08, 0.22];
const GOAL: [f32; 2] = [-0.15, 0.3];

const CUBE_HALF: f32 = 0.0125;
const MAX_EE_SPEED: f32 = 0.3;
const GRASP_RADIUS: f32 = 0.03;
const GOAL_RADIUS: f32 = 0.03;
/// gripper commands below this are closed
const GRIPPER_CLOSED: f32 = -0.3;

const EE_POSE_KEY: &str = "ee_pose";
const CUBE_POS_KEY: &str = "cube_pos";
const IMAGE_KEY: &str = "image_front";

/// Kinematic end-effector arm that has to carry a cube onto a goal patch.
pub struct PickPlaceCube {
    config: EnvConfig,
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    rng: Option<StdRng>,
    ee: [f32; 3],
    gripper: f32,
    cube: [f32; 3],
    grasped: bool,
    time: f64,
    last_reward: f32,
    view: Option<TerminalView>,
}

impl PickPlaceCube {
    pub fn new(config: EnvConfig) -> RecordResult<Self> {
        let mut observation_space = ObservationSpace::new();
        observation_space.insert(CUBE_POS_KEY.to_string(), vec![3]);
        observation_space.insert(EE_POSE_KEY.to_string(), vec![4]);
        if config.observation_mode == ObservationMode::Both {
            observation_space.insert(IMAGE_KEY.to_string(), vec![IMAGE_HEIGHT, IMAGE_WIDTH, 3]);
        }

        let view = match config.render_mode {
            RenderMode::Human => Some(TerminalView::new()?),
            RenderMode::Off => None,
        };

        Ok(Self {
            config,
            observation_space,
            action_space: ActionSpace::new(ACTION_LOW.to_vec(), ACTION_HIGH.to_vec()),
            rng: config.seed.map(StdRng::seed_from_u64),
            ee: HOME_EE,
            gripper: 0.0,
            cube: [CUBE_START[0], CUBE_START[1], CUBE_HALF],
            grasped: false,
            time: 0.0,
            last_reward: 0.0,
            view,
        })
    }

    fn cube_goal_distance(&self) -> f32 {
        let dx = self.cube[0] - GOAL[0];
        let dy = self.cube[1] - GOAL[1];
        (dx * dx + dy * dy).sqrt()
    }

    fn gripper_closed(&self) -> bool {
        self.gripper < GRIPPER_CLOSED
    }

    fn observe(&self) -> RecordResult<Observation> {
        let cpu = Device::Cpu;
        let mut obs = Observation::new();
        obs.insert(
            CUBE_POS_KEY.to_string(),
            Tensor::from_slice(&self.cube, 3, &cpu)?,
        );
        let ee_pose = [self.ee[0], self.ee[1], self.ee[2], self.gripper];
        obs.insert(
            EE_POSE_KEY.to_string(),
            Tensor::from_slice(&ee_pose, 4, &cpu)?,
        );
        if self.config.observation_mode == ObservationMode::Both {
            let pixels = self.rasterize();
            obs.insert(
                IMAGE_KEY.to_string(),
                Tensor::from_vec(pixels, (IMAGE_HEIGHT, IMAGE_WIDTH, 3), &cpu)?,
            );
        }
        Ok(obs)
    }

    /// Top-down camera: far edge of the table at the top row.
    fn rasterize(&self) -> Vec<u8> {
        let mut pixels = vec![0u8; IMAGE_HEIGHT * IMAGE_WIDTH * 3];
        for px in pixels.chunks_exact_mut(3) {
            px.copy_from_slice(&[70, 70, 70]);
        }

        let goal_px = to_pixel(GOAL[0], GOAL[1]);
        fill_square(&mut pixels, goal_px, 3, [150, 150, 150]);

        // cube grows slightly with height so lifting is visible
        let lift = ((self.cube[2] - CUBE_HALF) / 0.1).clamp(0.0, 1.0);
        let half = 2 + (lift * 2.0).round() as i32;
        fill_square(
            &mut pixels,
            to_pixel(self.cube[0], self.cube[1]),
            half,
            self.config.prop.cube.rgb(),
        );

        let ee_half = if self.gripper_closed() { 0 } else { 1 };
        fill_square(
            &mut pixels,
            to_pixel(self.ee[0], self.ee[1]),
            ee_half,
            [250, 250, 250],
        );
        pixels
    }
}

fn to_pixel(x: f32, y: f32) -> (i32, i32) {
    let u = (x - ACTION_LOW[0]) / (ACTION_HIGH[0] - ACTION_LOW[0]);
    let v = (y - ACTION_LOW[1]) / (ACTION_HIGH[1] - ACTION_LOW[1]);
    let col = (u * (IMAGE_WIDTH as f32 - 1.0)).round() as i32;
    let row = ((1.0 - v) * (IMAGE_HEIGHT as f32 - 1.0)).round() as i32;
    (row, col)
}

fn fill_square(pixels: &mut [u8], (row, col): (i32, i32), half: i32, rgb: [u8; 3]) {
    for r in (row - half)..=(row + half) {
        for c in (col - half)..=(col + half) {
            if r < 0 || c < 0 || r >= IMAGE_HEIGHT as i32 || c >= IMAGE_WIDTH as i32 {
                continue;
            }
            let offset = (r as usize * IMAGE_WIDTH + c as usize) * 3;
            pixels[offset..offset + 3].copy_from_slice(&rgb);
        }
    }
}

impl Environment for PickPlaceCube {
    fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn reset(&mut self) -> RecordResult<Observation> {
        let start = match self.rng.as_mut() {
            Some(rng) => [rng.gen_range(-0.05..=0.15), rng.gen_range(0.12..=0.3)],
            None => CUBE_START,
        };
        self.ee = HOME_EE;
        self.gripper = 0.0;
        self.cube = [start[0], start[1], CUBE_HALF];
        self.grasped = false;
        self.time = 0.0;
        self.last_reward = -self.cube_goal_distance();
        self.observe()
    }

    fn step(&mut self, action: &[f32]) -> RecordResult<StepOutcome> {
        if action.len() != self.action_space.dim() {
            return Err(RecordError::ActionOutOfSpace {
                action: action.to_vec(),
            });
        }
        if !self.action_space.contains(action) {
            debug!("clipping out-of-range action {action:?}");
        }

        // track the clipped target at bounded speed
        let mut delta = [0f32; 3];
        for (axis, d) in delta.iter_mut().enumerate() {
            let target = action[axis].clamp(ACTION_LOW[axis], ACTION_HIGH[axis]);
            *d = target - self.ee[axis];
        }
        let dist = delta.iter().map(|d| d * d).sum::<f32>().sqrt();
        let max_step = MAX_EE_SPEED * DT as f32;
        let scale = if dist > max_step { max_step / dist } else { 1.0 };
        for (axis, d) in delta.iter().enumerate() {
            self.ee[axis] += d * scale;
        }
        self.gripper = action[3].clamp(ACTION_LOW[3], ACTION_HIGH[3]);

        if self.grasped && !self.gripper_closed() {
            self.grasped = false;
            self.cube[2] = CUBE_HALF;
        } else if !self.grasped && self.gripper_closed() {
            let reach = self
                .ee
                .iter()
                .zip(self.cube.iter())
                .map(|(e, c)| (e - c) * (e - c))
                .sum::<f32>()
                .sqrt();
            if reach < GRASP_RADIUS {
                self.grasped = true;
            }
        }
        if self.grasped {
            self.cube = [self.ee[0], self.ee[1], (self.ee[2] - CUBE_HALF).max(CUBE_HALF)];
        }

        self.time += DT;
        let distance = self.cube_goal_distance();
        self.last_reward = -distance;

        Ok(StepOutcome {
            observation: self.observe()?,
            reward: self.last_reward,
            terminated: !self.grasped && distance < GOAL_RADIUS,
            truncated: false,
            timestamp: self.time,
        })
    }

    fn control_period(&self) -> Duration {
        Duration::from_secs_f64(DT)
    }

    fn render(&mut self) -> RecordResult<()> {
        let snapshot = SceneSnapshot {
            ee: self.ee,
            gripper: self.gripper,
            cube: self.cube,
            cube_rgb: self.config.prop.cube.rgb(),
            goal: GOAL,
            grasped: self.grasped,
            time: self.time,
            reward: self.last_reward,
        };
        if let Some(view) = self.view.as_mut() {
            view.draw(&snapshot)?;
        }
        Ok(())
    }
}

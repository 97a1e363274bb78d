use std::collections::BTreeMap;

use candle_core::Tensor;

use crate::error::{RecordError, RecordResult};
use crate::robot::{Observation, ObservationSpace};

use super::VideoFrame;

/// Per-step buffers of the episode currently being recorded.
#[derive(Debug, Default)]
pub struct EpisodeBuffer {
    observations: BTreeMap<String, Vec<Tensor>>,
    actions: Vec<Vec<f32>>,
    timestamps: Vec<f64>,
}

impl EpisodeBuffer {
    pub fn new(space: &ObservationSpace) -> Self {
        Self {
            observations: space.keys().map(|k| (k.clone(), Vec::new())).collect(),
            actions: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Append one step. Tensors are immutable, so the clone cannot alias later steps.
    pub fn record_step(&mut self, observation: &Observation, action: &[f32], timestamp: f64) {
        for (key, value) in observation {
            self.observations
                .entry(key.clone())
                .or_default()
                .push(value.clone());
        }
        self.actions.push(action.to_vec());
        self.timestamps.push(timestamp);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn observations(&self, key: &str) -> RecordResult<&[Tensor]> {
        self.observations
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| RecordError::MissingObservationKey(key.to_string()))
    }

    pub fn actions(&self) -> &[Vec<f32>] {
        &self.actions
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Steps per second of simulated time.
    pub fn fps(&self) -> RecordResult<f64> {
        match self.timestamps.last() {
            Some(&elapsed) if elapsed > 0.0 => Ok(self.len() as f64 / elapsed),
            _ => Err(RecordError::MalformedDataset(
                "episode has no elapsed time".to_string(),
            )),
        }
    }
}

/// Columns of one finished episode, ready to be concatenated into a [`super::Dataset`].
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub episode_index: usize,
    pub num_steps: usize,
    pub fps: f64,
    pub state: Tensor,
    pub action: Tensor,
    pub episode_index_column: Tensor,
    pub frame_index: Tensor,
    pub timestamp: Tensor,
    pub next_done: Tensor,
    pub video_frames: BTreeMap<String, Vec<VideoFrame>>,
}

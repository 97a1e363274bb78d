use std::path::Path;

use log::info;

use super::Dataset;
use crate::error::{RecordError, RecordResult};
use crate::teleop::EpisodeState;

/// Feeds the actions of a recorded dataset back into the control loop, one per step.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    actions: Vec<Vec<f32>>,
    episode_index: Vec<i64>,
    frame_index: usize,
}

impl ReplaySource {
    pub fn new(dataset: &Dataset) -> RecordResult<Self> {
        let actions = dataset.actions()?;
        let episode_index = dataset.episode_indices()?;
        if actions.is_empty() {
            return Err(RecordError::EmptyDataset);
        }
        if actions.len() != episode_index.len() {
            return Err(RecordError::MalformedDataset(format!(
                "{} actions but {} episode indices",
                actions.len(),
                episode_index.len()
            )));
        }
        info!(
            "replaying {} frames over {} episodes",
            actions.len(),
            dataset.num_episodes()
        );
        Ok(Self {
            actions,
            episode_index,
            frame_index: 0,
        })
    }

    pub fn from_disk(root: &Path) -> RecordResult<Self> {
        Self::new(&Dataset::load(root)?)
    }

    pub fn num_samples(&self) -> usize {
        self.actions.len()
    }

    pub fn cursor(&self) -> usize {
        self.frame_index
    }

    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    pub fn action_at_cursor(&self) -> &[f32] {
        &self.actions[self.frame_index]
    }

    /// The next stored frame belongs to another episode.
    pub fn is_at_last_frame_in_episode(&self) -> bool {
        self.episode_index
            .get(self.frame_index + 1)
            .is_some_and(|&next| next != self.episode_index[self.frame_index])
    }

    pub fn is_at_last_frame_in_dataset(&self) -> bool {
        self.frame_index + 1 == self.actions.len()
    }

    /// Action at the cursor. Concludes and stops on the last stored frame,
    /// concludes (and advances) at an episode boundary, otherwise advances.
    pub fn next_action(&mut self, state: &EpisodeState) -> Vec<f32> {
        let action = self.action_at_cursor().to_vec();
        if self.is_at_last_frame_in_dataset() {
            state.conclude_and_stop();
        } else if self.is_at_last_frame_in_episode() {
            state.conclude();
            self.advance();
        } else {
            self.advance();
        }
        action
    }
}

#[cfg(test)]
impl ReplaySource {
    pub(crate) fn from_parts(actions: Vec<Vec<f32>>, episode_index: Vec<i64>) -> Self {
        Self {
            actions,
            episode_index,
            frame_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(episodes: &[usize]) -> ReplaySource {
        let mut actions = Vec::new();
        let mut index = Vec::new();
        for (ep, &len) in episodes.iter().enumerate() {
            for step in 0..len {
                actions.push(vec![ep as f32, step as f32]);
                index.push(ep as i64);
            }
        }
        ReplaySource::from_parts(actions, index)
    }

    #[test]
    fn boundary_concludes_without_stopping() {
        let mut replay = source(&[2, 1]);
        let state = EpisodeState::new();

        assert_eq!(replay.next_action(&state), vec![0.0, 0.0]);
        assert!(!state.is_concluding());

        assert_eq!(replay.next_action(&state), vec![0.0, 1.0]);
        assert!(state.is_concluding());
        assert!(!state.is_stopping());
        assert_eq!(replay.cursor(), 2);

        state.begin_episode();
        assert_eq!(replay.next_action(&state), vec![1.0, 0.0]);
        assert!(state.is_concluding());
        assert!(state.is_stopping());
        assert_eq!(replay.cursor(), 2);
    }

    #[test]
    fn replay_reproduces_episode_lengths() {
        let lengths = [5, 3, 4];
        let mut replay = source(&lengths);
        let state = EpisodeState::new();

        let mut replayed = Vec::new();
        while !state.is_stopping() {
            state.begin_episode();
            let mut steps = 0;
            while !state.is_concluding() {
                replay.next_action(&state);
                steps += 1;
            }
            replayed.push(steps);
        }
        assert_eq!(replayed, lengths);
    }

    #[test]
    fn single_frame_dataset_stops_immediately() {
        let mut replay = source(&[1]);
        let state = EpisodeState::new();
        assert!(replay.is_at_last_frame_in_dataset());
        assert!(!replay.is_at_last_frame_in_episode());
        replay.next_action(&state);
        assert!(state.is_concluding() && state.is_stopping());
    }
}

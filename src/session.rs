use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::dataset::Dataset;
use crate::dataset::episode::EpisodeBuffer;
use crate::dataset::output::OutputAssembler;
use crate::dataset::replay::ReplaySource;
use crate::error::{RecordError, RecordResult};
use crate::robot::{self, EnvConfig, Environment, PropConfig, RenderMode};
use crate::teleop::EpisodeState;

/// Starting pose `[x, y, z, gripper]` written over the sampled teleop action.
pub const INITIAL_ACTION: [f32; 4] = [0.0, 0.14, 0.17, 0.0];

/// Phase of one recording run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    RunningEpisode,
    Dropped,
    Recorded,
    Stopped,
    Finalized,
}

impl RunPhase {
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Starting, RunningEpisode)
                | (Starting, Stopped)
                | (RunningEpisode, Dropped)
                | (RunningEpisode, Recorded)
                | (Dropped, RunningEpisode)
                | (Dropped, Stopped)
                | (Recorded, RunningEpisode)
                | (Recorded, Stopped)
                | (Stopped, Finalized)
        )
    }
}

/// Where the control loop gets its next action from.
pub enum ActionSource {
    /// shared action vector edited by the input thread
    Teleop,
    Replay(ReplaySource),
}

/// Per-run scene setup.
#[derive(Debug, Clone, Copy)]
pub struct TaskParameters {
    pub prop: PropConfig,
}

#[derive(Debug, Clone)]
pub struct SimSettings {
    pub env_name: String,
    pub render_mode: RenderMode,
    pub seed: Option<u64>,
}

impl SimSettings {
    fn env_config(&self, task: TaskParameters) -> EnvConfig {
        EnvConfig::new(task.prop, self.render_mode).with_seed(self.seed)
    }
}

/// Runs the record loop and hands kept episodes to the output assembler.
pub struct Session {
    state: Arc<EpisodeState>,
    output: OutputAssembler,
    settings: SimSettings,
    rng: StdRng,
    phase: RunPhase,
}

impl Session {
    pub fn new(state: Arc<EpisodeState>, output: OutputAssembler, settings: SimSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state,
            output,
            settings,
            rng,
            phase: RunPhase::Starting,
        }
    }

    pub fn state(&self) -> &Arc<EpisodeState> {
        &self.state
    }

    pub fn output(&self) -> &OutputAssembler {
        &self.output
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.phase
        );
        debug!("{:?} -> {next:?}", self.phase);
        self.phase = next;
    }

    pub fn construct_and_set_up_env(
        &self,
        task: TaskParameters,
    ) -> RecordResult<Box<dyn Environment>> {
        let env = robot::make(&self.settings.env_name, self.settings.env_config(task))?;
        info!(
            "{} created with {}",
            self.settings.env_name,
            task.prop.cube.name()
        );
        Ok(env)
    }

    /// Record a new dataset from keyboard teleop.
    pub fn teleop_robot_and_record_data(&mut self, task: TaskParameters) -> RecordResult<Dataset> {
        let mut env = self.construct_and_set_up_env(task)?;
        self.run(env.as_mut(), ActionSource::Teleop)
    }

    /// Replay `source`, or the most recent run on disk when `None`, into a new dataset.
    pub fn replay_dataset_actions_in_sim(
        &mut self,
        source: Option<&Dataset>,
        task: TaskParameters,
    ) -> RecordResult<Dataset> {
        let replay = match source {
            Some(dataset) => ReplaySource::new(dataset)?,
            None => {
                let root = self.output.paths().root().to_path_buf();
                info!("replaying {}", root.display());
                ReplaySource::from_disk(&root)?
            }
        };
        let mut env = self.construct_and_set_up_env(task)?;
        self.run(env.as_mut(), ActionSource::Replay(replay))
    }

    /// One full run: episodes until stopped, then the consolidated dataset.
    pub fn run(
        &mut self,
        env: &mut dyn Environment,
        mut source: ActionSource,
    ) -> RecordResult<Dataset> {
        self.phase = RunPhase::Starting;
        self.output.begin_run()?;
        let init_obs = env.reset()?;
        self.output.set_up_data_keys(&init_obs)?;

        // live input runs at the simulator's rate, replay as fast as it can
        let frame_period = match source {
            ActionSource::Teleop => Some(env.control_period()),
            ActionSource::Replay(_) => None,
        };

        let mut episode_counter = 0;
        self.state.reset_run();
        while !self.state.is_stopping() {
            self.set_up_next_episode(env, &source)?;
            self.enter(RunPhase::RunningEpisode);
            info!("Starting episode #{episode_counter}");

            let mut buffer = EpisodeBuffer::new(env.observation_space());
            self.state.begin_episode();
            // a bare stop (escape) also ends the episode in progress
            while !self.state.is_concluding() && !self.state.is_stopping() {
                let frame_start = Instant::now();

                let action = self.next_action(&mut source)?;
                let outcome = env.step(&action)?;
                env.render()?;
                buffer.record_step(&outcome.observation, &action, outcome.timestamp);

                if let Some(period) = frame_period {
                    let elapsed = frame_start.elapsed();
                    if elapsed < period {
                        thread::sleep(period - elapsed);
                    }
                }
            }

            if self.state.is_dropping() {
                info!("dropping episode #{episode_counter} ({} steps)", buffer.len());
                self.enter(RunPhase::Dropped);
                continue;
            }

            self.enter(RunPhase::Recorded);
            info!("saving episode {episode_counter}...");
            if self.output.finalize_episode(episode_counter, buffer)? {
                episode_counter += 1;
            }
        }

        self.enter(RunPhase::Stopped);
        let dataset = self.output.finalize_run()?;
        self.enter(RunPhase::Finalized);
        info!(
            "run {} finished: {} episodes, {} frames",
            self.output.dataset_counter(),
            dataset.num_episodes(),
            dataset.num_samples()
        );
        Ok(dataset)
    }

    fn set_up_next_episode(
        &mut self,
        env: &mut dyn Environment,
        source: &ActionSource,
    ) -> RecordResult<()> {
        env.reset()?;
        match source {
            ActionSource::Teleop => {
                let mut sample = env.action_space().sample(&mut self.rng);
                for (value, &init) in sample.iter_mut().zip(INITIAL_ACTION.iter()) {
                    *value = init;
                }
                debug!("init_action={sample:?}");
                if !env.action_space().contains(&sample) {
                    return Err(RecordError::ActionOutOfSpace { action: sample });
                }
                self.state.set_action(Some(sample));
            }
            ActionSource::Replay(_) => self.state.set_action(None),
        }
        Ok(())
    }

    fn next_action(&self, source: &mut ActionSource) -> RecordResult<Vec<f32>> {
        match source {
            ActionSource::Teleop => self.state.action().ok_or(RecordError::NoTeleopAction),
            ActionSource::Replay(replay) => Ok(replay.next_action(&self.state)),
        }
    }
}

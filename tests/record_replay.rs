use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use candle_core::{Device, Tensor};

use teleop_dataset::RecordResult;
use teleop_dataset::dataset::Dataset;
use teleop_dataset::dataset::output::{OutputAssembler, OutputConfig};
use teleop_dataset::dataset::replay::ReplaySource;
use teleop_dataset::hub::HubClient;
use teleop_dataset::robot::{
    ActionSpace, Environment, Observation, ObservationSpace, RenderMode, StepOutcome,
};
use teleop_dataset::session::{ActionSource, INITIAL_ACTION, Session, SimSettings};
use teleop_dataset::teleop::{self, EpisodeState, TeleopKey};
use teleop_dataset::video::VideoEncoder;

/// Headless arm: the state follows the commanded action, the camera shows a gradient.
struct HeadlessArm {
    space: ObservationSpace,
    action_space: ActionSpace,
    pose: Vec<f32>,
    time: f64,
    // keys "pressed" after a given step of the current episode
    script: VecDeque<(usize, Vec<TeleopKey>)>,
    steps: usize,
    state: Arc<EpisodeState>,
}

impl HeadlessArm {
    fn new(state: Arc<EpisodeState>, script: Vec<(usize, Vec<TeleopKey>)>) -> Self {
        let mut space = ObservationSpace::new();
        space.insert("ee_pose".to_string(), vec![4]);
        space.insert("image_front".to_string(), vec![4, 6, 3]);
        Self {
            space,
            action_space: ActionSpace::new(vec![-1.0; 4], vec![1.0; 4]),
            pose: vec![0.0; 4],
            time: 0.0,
            script: script.into(),
            steps: 0,
            state,
        }
    }

    fn observe(&self) -> RecordResult<Observation> {
        let cpu = Device::Cpu;
        let shade = ((self.pose[0] + 1.0) * 100.0) as u8;
        let mut obs = Observation::new();
        obs.insert(
            "ee_pose".to_string(),
            Tensor::from_slice(&self.pose, 4, &cpu)?,
        );
        obs.insert(
            "image_front".to_string(),
            Tensor::from_vec(vec![shade; 4 * 6 * 3], (4, 6, 3), &cpu)?,
        );
        Ok(obs)
    }
}

impl Environment for HeadlessArm {
    fn observation_space(&self) -> &ObservationSpace {
        &self.space
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn reset(&mut self) -> RecordResult<Observation> {
        self.pose = vec![0.0; 4];
        self.time = 0.0;
        self.steps = 0;
        self.observe()
    }

    fn step(&mut self, action: &[f32]) -> RecordResult<StepOutcome> {
        self.pose = action.to_vec();
        self.time += 1.0 / 30.0;
        self.steps += 1;
        if self.script.front().is_some_and(|(at, _)| *at == self.steps)
            && let Some((_, keys)) = self.script.pop_front()
        {
            for key in keys {
                teleop::on_press(key, &self.state);
                teleop::on_release(key, &self.state);
            }
        }
        Ok(StepOutcome {
            observation: self.observe()?,
            reward: 0.0,
            terminated: false,
            truncated: false,
            timestamp: self.time,
        })
    }

    fn render(&mut self) -> RecordResult<()> {
        Ok(())
    }

    fn control_period(&self) -> Duration {
        Duration::ZERO
    }
}

/// Writes a placeholder file where the video would go.
struct PlaceholderEncoder;

impl VideoEncoder for PlaceholderEncoder {
    fn encode(&self, imgs_dir: &Path, video_path: &Path, _fps: f64) -> RecordResult<()> {
        let frames = std::fs::read_dir(imgs_dir)?.count();
        std::fs::write(video_path, frames.to_string())?;
        Ok(())
    }
}

#[derive(Default, Clone)]
struct RecordingHub(Rc<RefCell<Vec<(String, String)>>>);

impl HubClient for RecordingHub {
    fn upload_folder(
        &self,
        _repo_id: &str,
        _folder: &Path,
        path_in_repo: &str,
        revision: &str,
    ) -> RecordResult<()> {
        self.0
            .borrow_mut()
            .push((path_in_repo.to_string(), revision.to_string()));
        Ok(())
    }
}

fn session(data_root: &Path, hub: RecordingHub, push_to_hub: bool) -> Session {
    let output = OutputAssembler::new(
        OutputConfig {
            data_root: data_root.to_path_buf(),
            repo_id: "lab/cube_demo".to_string(),
            num_workers: 2,
            push_to_hub,
            revision: "v1.6".to_string(),
        },
        Box::new(PlaceholderEncoder),
        Box::new(hub),
    )
    .unwrap();
    let settings = SimSettings {
        env_name: "PickPlaceCube-v0".to_string(),
        render_mode: RenderMode::Off,
        seed: Some(11),
    };
    Session::new(Arc::new(EpisodeState::new()), output, settings)
}

fn episode_lengths(dataset: &Dataset) -> Vec<usize> {
    dataset.episode_data_index.ranges().map(|r| r.len()).collect()
}

#[test]
fn fifty_and_thirty_steps_make_eighty_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path(), RecordingHub::default(), false);
    let mut env = HeadlessArm::new(
        session.state().clone(),
        vec![
            (10, vec![TeleopKey::Right]),
            (50, vec![TeleopKey::Home]),
            (20, vec![TeleopKey::Delete]),
            (30, vec![TeleopKey::End]),
        ],
    );

    let dataset = session.run(&mut env, ActionSource::Teleop).unwrap();

    assert_eq!(dataset.num_samples(), 80);
    let ranges: Vec<_> = dataset.episode_data_index.ranges().collect();
    assert_eq!(ranges, vec![0..50, 50..80]);

    let done = dataset.next_done_flags().unwrap();
    let done_rows: Vec<usize> = (0..done.len()).filter(|&i| done[i]).collect();
    assert_eq!(done_rows, vec![49, 79]);

    let episodes = dataset.episode_indices().unwrap();
    assert!(episodes[..50].iter().all(|&e| e == 0));
    assert!(episodes[50..].iter().all(|&e| e == 1));
    let frames = dataset.frame_index.to_vec1::<i64>().unwrap();
    assert_eq!(frames[50], 0);
    assert_eq!(frames[79], 29);

    // the right arrow moved x by one increment from step 11 on
    let actions = dataset.actions().unwrap();
    assert_eq!(actions[9], INITIAL_ACTION.to_vec());
    assert!((actions[10][0] - 0.01).abs() < 1e-6);
    // a fresh episode starts from the initial pose again
    assert_eq!(actions[50], INITIAL_ACTION.to_vec());

    // the dropped episode left no frames or video behind
    let root = dir.path().join("1/lab/cube_demo");
    assert!(root.join("videos/image_front_episode_000001.mp4").exists());
    assert!(!root.join("videos/image_front_episode_000002.mp4").exists());
    assert!(!root.join("images/image_front_episode_000002").exists());
    let video = std::fs::read_to_string(root.join("videos/image_front_episode_000001.mp4")).unwrap();
    assert_eq!(video, "30");

    assert!((dataset.info.fps - 30.0).abs() < 1e-3);
    assert!(dataset.info.video);
    let image_stats = dataset.stats.get("observation.images.front").unwrap();
    assert_eq!(image_stats.max.dims(), &[3]);
}

#[test]
fn saved_dataset_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path(), RecordingHub::default(), false);
    let mut env = HeadlessArm::new(
        session.state().clone(),
        vec![(3, vec![TeleopKey::PageUp]), (8, vec![TeleopKey::End])],
    );
    let dataset = session.run(&mut env, ActionSource::Teleop).unwrap();

    let loaded = Dataset::load(dataset.paths.root()).unwrap();
    assert_eq!(loaded.num_samples(), 8);
    assert_eq!(loaded.features, dataset.features);
    assert_eq!(loaded.info.codebase_version, "v1.6");
    assert!((loaded.info.fps - dataset.info.fps).abs() < 1e-9);
    assert_eq!(loaded.episode_data_index, dataset.episode_data_index);
    assert_eq!(loaded.actions().unwrap(), dataset.actions().unwrap());
    assert_eq!(
        loaded.next_done_flags().unwrap(),
        dataset.next_done_flags().unwrap()
    );
    assert_eq!(loaded.video_frames, dataset.video_frames);
    assert_eq!(
        loaded.video_frames["observation.images.front"][0].path,
        "videos/image_front_episode_000000.mp4"
    );
}

#[test]
fn replay_from_disk_and_memory_reproduces_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path(), RecordingHub::default(), false);
    let mut env = HeadlessArm::new(
        session.state().clone(),
        vec![
            (4, vec![TeleopKey::Home]),
            (2, vec![TeleopKey::Left, TeleopKey::Home]),
            (7, vec![TeleopKey::End]),
        ],
    );
    let recorded = session.run(&mut env, ActionSource::Teleop).unwrap();
    assert_eq!(episode_lengths(&recorded), vec![4, 2, 7]);

    let from_disk = ReplaySource::from_disk(recorded.paths.root()).unwrap();
    let mut replay_env = HeadlessArm::new(session.state().clone(), vec![]);
    let replayed_disk = session
        .run(&mut replay_env, ActionSource::Replay(from_disk))
        .unwrap();

    let from_memory = ReplaySource::new(&recorded).unwrap();
    let mut replay_env = HeadlessArm::new(session.state().clone(), vec![]);
    let replayed_memory = session
        .run(&mut replay_env, ActionSource::Replay(from_memory))
        .unwrap();

    for replayed in [&replayed_disk, &replayed_memory] {
        assert_eq!(episode_lengths(replayed), vec![4, 2, 7]);
        assert_eq!(replayed.actions().unwrap(), recorded.actions().unwrap());
    }
    assert_eq!(replayed_disk.paths.root(), dir.path().join("2/lab/cube_demo"));
    assert_eq!(replayed_memory.paths.root(), dir.path().join("3/lab/cube_demo"));
}

#[test]
fn publishing_uploads_every_folder_twice() {
    let dir = tempfile::tempdir().unwrap();
    let hub = RecordingHub::default();
    let mut session = session(dir.path(), hub.clone(), true);
    let mut env = HeadlessArm::new(session.state().clone(), vec![(5, vec![TeleopKey::End])]);
    session.run(&mut env, ActionSource::Teleop).unwrap();

    let uploads = hub.0.borrow();
    assert_eq!(uploads.len(), 6);
    for folder in ["train", "meta_data", "videos"] {
        for revision in ["main", "v1.6"] {
            assert!(
                uploads
                    .iter()
                    .any(|(f, r)| f == folder && r == revision)
            );
        }
    }
}

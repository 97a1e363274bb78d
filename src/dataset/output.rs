use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use log::{info, warn};
use tqdm::Iter;

use super::episode::{EpisodeBuffer, EpisodeRecord};
use super::stats::{self, FeatureStats, RunningStats};
use super::{
    ACTION_KEY, CODEBASE_VERSION, Dataset, DatasetInfo, DatasetPaths, EPISODE_INDEX_KEY,
    EpisodeDataIndex, FRAME_INDEX_KEY, Feature, Features, INDEX_KEY, NEXT_DONE_KEY, STATE_KEY,
    TIMESTAMP_KEY, VideoFrame,
};
use crate::error::{RecordError, RecordResult};
use crate::hub::{self, HubClient};
use crate::robot::Observation;
use crate::utils::{as_f32_rows, episode_file_stem, frame_pixels_as_rows, image_feature_key};
use crate::video::{ImageWriter, VideoEncoder};

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub data_root: PathBuf,
    pub repo_id: String,
    pub num_workers: usize,
    pub push_to_hub: bool,
    pub revision: String,
}

/// Collects finished episodes of a run and turns them into a [`Dataset`].
pub struct OutputAssembler {
    config: OutputConfig,
    encoder: Box<dyn VideoEncoder>,
    hub: Box<dyn HubClient>,
    images: ImageWriter,
    dataset_counter: usize,

    // reset for every run
    episodes: Vec<EpisodeRecord>,
    episode_data_index: EpisodeDataIndex,
    id_from: usize,
    image_keys: Vec<String>,
    state_keys: Vec<String>,
    image_stats: BTreeMap<String, RunningStats>,
}

impl OutputAssembler {
    pub fn new(
        config: OutputConfig,
        encoder: Box<dyn VideoEncoder>,
        hub: Box<dyn HubClient>,
    ) -> RecordResult<Self> {
        let images = ImageWriter::new(config.num_workers)?;
        Ok(Self {
            config,
            encoder,
            hub,
            images,
            dataset_counter: 0,
            episodes: Vec::new(),
            episode_data_index: EpisodeDataIndex::default(),
            id_from: 0,
            image_keys: Vec::new(),
            state_keys: Vec::new(),
            image_stats: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Paths of the current (or most recent) run.
    pub fn paths(&self) -> DatasetPaths {
        DatasetPaths::for_run(
            &self.config.data_root,
            self.dataset_counter,
            &self.config.repo_id,
        )
    }

    pub fn dataset_counter(&self) -> usize {
        self.dataset_counter
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn image_keys(&self) -> &[String] {
        &self.image_keys
    }

    pub fn state_keys(&self) -> &[String] {
        &self.state_keys
    }

    /// Start a new numbered run directory and forget the previous run's episodes.
    pub fn begin_run(&mut self) -> RecordResult<()> {
        self.dataset_counter += 1;
        self.episodes.clear();
        self.episode_data_index = EpisodeDataIndex::default();
        self.id_from = 0;
        self.image_keys.clear();
        self.state_keys.clear();
        self.image_stats.clear();

        let paths = self.paths();
        fs::create_dir_all(paths.images_dir())?;
        fs::create_dir_all(paths.videos_dir())?;
        info!("run {} writes to {}", self.dataset_counter, paths.root().display());
        Ok(())
    }

    /// Split observation keys into state vectors and camera images by rank.
    pub fn set_up_data_keys(&mut self, observation: &Observation) -> RecordResult<()> {
        self.image_keys.clear();
        self.state_keys.clear();
        for (key, value) in observation {
            match value.rank() {
                1 => self.state_keys.push(key.clone()),
                3 => self.image_keys.push(key.clone()),
                _ => {
                    return Err(RecordError::UnrecognisedShape {
                        key: key.clone(),
                        shape: value.dims().to_vec(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Encode and stack one episode. Returns false when the episode had no steps.
    pub fn finalize_episode(
        &mut self,
        episode_index: usize,
        buffer: EpisodeBuffer,
    ) -> RecordResult<bool> {
        let num_steps = buffer.len();
        if num_steps == 0 {
            warn!("episode {episode_index} has no steps, skipping");
            return Ok(false);
        }
        let fps = buffer.fps()?;
        // nothing touches disk for a malformed episode
        let action_dim = buffer.actions()[0].len();
        if buffer.actions().iter().any(|a| a.len() != action_dim) {
            return Err(RecordError::MalformedDataset(format!(
                "episode {episode_index} mixes action lengths"
            )));
        }
        let paths = self.paths();
        let cpu = Device::Cpu;

        // store images in png and create the video
        let mut video_frames = BTreeMap::new();
        for img_key in &self.image_keys {
            let frames = buffer.observations(img_key)?;
            let stem = episode_file_stem(img_key, episode_index);
            let imgs_dir = paths.images_dir().join(&stem);
            self.images.save_images_concurrently(frames, &imgs_dir)?;

            let fname = format!("{stem}.mp4");
            self.encoder
                .encode(&imgs_dir, &paths.videos_dir().join(&fname), fps)?;

            let feature_key = image_feature_key(img_key);
            let refs = buffer
                .timestamps()
                .iter()
                .map(|&t| VideoFrame {
                    path: format!("videos/{fname}"),
                    timestamp: t as f32,
                })
                .collect::<Vec<_>>();

            // one frame at a time keeps long episodes out of memory
            let running = self.image_stats.entry(feature_key.clone()).or_default();
            for frame in frames {
                running.update(&frame_pixels_as_rows(frame)?)?;
            }
            video_frames.insert(feature_key, refs);
        }

        let mut states = Vec::with_capacity(self.state_keys.len());
        for state_key in &self.state_keys {
            let rows = Tensor::stack(buffer.observations(state_key)?, 0)?;
            states.push(rows.to_dtype(DType::F32)?);
        }
        let state = if states.is_empty() {
            Tensor::zeros((num_steps, 0), DType::F32, &cpu)?
        } else {
            Tensor::cat(&states, 1)?
        };

        let action = Tensor::from_vec(
            buffer.actions().concat(),
            (num_steps, action_dim),
            &cpu,
        )?;

        let mut next_done = vec![0u8; num_steps];
        next_done[num_steps - 1] = 1;
        let timestamps: Vec<f32> = buffer.timestamps().iter().map(|&t| t as f32).collect();

        let record = EpisodeRecord {
            episode_index,
            num_steps,
            fps,
            state,
            action,
            episode_index_column: Tensor::from_vec(
                vec![episode_index as i64; num_steps],
                num_steps,
                &cpu,
            )?,
            frame_index: Tensor::arange(0i64, num_steps as i64, &cpu)?,
            timestamp: Tensor::from_vec(timestamps, num_steps, &cpu)?,
            next_done: Tensor::from_vec(next_done, num_steps, &cpu)?,
            video_frames,
        };

        info!(
            "Episode {episode_index} done, {num_steps} steps, fps: {:.2}",
            record.fps
        );
        self.episode_data_index
            .push(self.id_from, self.id_from + num_steps);
        self.id_from += num_steps;
        self.episodes.push(record);
        Ok(true)
    }

    /// Concatenate the run's episodes, compute statistics, save and optionally publish.
    pub fn finalize_run(&mut self) -> RecordResult<Dataset> {
        if self.episodes.is_empty() {
            return Err(RecordError::EmptyDataset);
        }
        info!("concatenate {} episodes", self.episodes.len());

        let column = |f: fn(&EpisodeRecord) -> &Tensor| -> RecordResult<Tensor> {
            let parts: Vec<&Tensor> = self.episodes.iter().map(f).collect();
            Ok(Tensor::cat(&parts, 0)?)
        };
        let observation_state = column(|e| &e.state)?;
        let action = column(|e| &e.action)?;
        let episode_index = column(|e| &e.episode_index_column)?;
        let frame_index = column(|e| &e.frame_index)?;
        let timestamp = column(|e| &e.timestamp)?;
        let next_done = column(|e| &e.next_done)?;
        let num_rows = observation_state.dim(0)?;
        let index = Tensor::arange(0i64, num_rows as i64, &Device::Cpu)?;

        let mut video_frames: BTreeMap<String, Vec<VideoFrame>> = BTreeMap::new();
        for episode in &self.episodes {
            for (key, refs) in &episode.video_frames {
                video_frames
                    .entry(key.clone())
                    .or_default()
                    .extend(refs.iter().cloned());
            }
        }

        let mut features = Features::new();
        for key in video_frames.keys() {
            features.insert(key.clone(), Feature::VideoFrame);
        }
        features.insert(
            STATE_KEY.to_string(),
            Feature::Sequence {
                length: observation_state.dim(1)?,
                dtype: "float32".to_string(),
            },
        );
        features.insert(
            ACTION_KEY.to_string(),
            Feature::Sequence {
                length: action.dim(1)?,
                dtype: "float32".to_string(),
            },
        );
        for (key, dtype) in [
            (EPISODE_INDEX_KEY, "int64"),
            (FRAME_INDEX_KEY, "int64"),
            (TIMESTAMP_KEY, "float32"),
            (NEXT_DONE_KEY, "bool"),
            (INDEX_KEY, "int64"),
        ] {
            features.insert(
                key.to_string(),
                Feature::Value {
                    dtype: dtype.to_string(),
                },
            );
        }

        info!("compute stats");
        let mut feature_stats: BTreeMap<String, FeatureStats> = BTreeMap::new();
        for (key, running) in &self.image_stats {
            feature_stats.insert(key.clone(), running.finish()?);
        }
        let numeric = [
            (STATE_KEY, &observation_state),
            (ACTION_KEY, &action),
            (EPISODE_INDEX_KEY, &episode_index),
            (FRAME_INDEX_KEY, &frame_index),
            (TIMESTAMP_KEY, &timestamp),
            (NEXT_DONE_KEY, &next_done),
            (INDEX_KEY, &index),
        ];
        for (key, values) in numeric.into_iter().tqdm() {
            feature_stats.insert(key.to_string(), stats::column_stats(&as_f32_rows(values)?)?);
        }

        let fps =
            self.episodes.iter().map(|e| e.fps).sum::<f64>() / self.episodes.len() as f64;
        let dataset = Dataset {
            repo_id: self.config.repo_id.clone(),
            paths: self.paths(),
            info: DatasetInfo {
                codebase_version: CODEBASE_VERSION.to_string(),
                fps,
                video: !self.image_keys.is_empty(),
            },
            features,
            episode_data_index: self.episode_data_index.clone(),
            stats: feature_stats,
            observation_state,
            action,
            episode_index,
            frame_index,
            timestamp,
            next_done,
            index,
            video_frames,
        };
        dataset.save_to_disk()?;

        if self.config.push_to_hub {
            hub::push_dataset_to_hub(
                &*self.hub,
                &self.config.repo_id,
                &dataset.paths,
                &self.config.revision,
            )?;
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::robot::ObservationSpace;

    struct StubEncoder;

    impl VideoEncoder for StubEncoder {
        fn encode(&self, _imgs_dir: &Path, video_path: &Path, _fps: f64) -> RecordResult<()> {
            fs::write(video_path, b"")?;
            Ok(())
        }
    }

    struct OfflineHub;

    impl HubClient for OfflineHub {
        fn upload_folder(&self, _: &str, _: &Path, _: &str, _: &str) -> RecordResult<()> {
            Err(RecordError::Hub("offline".to_string()))
        }
    }

    fn assembler(data_root: &Path) -> OutputAssembler {
        let config = OutputConfig {
            data_root: data_root.to_path_buf(),
            repo_id: "lab/unit".to_string(),
            num_workers: 1,
            push_to_hub: false,
            revision: CODEBASE_VERSION.to_string(),
        };
        OutputAssembler::new(config, Box::new(StubEncoder), Box::new(OfflineHub)).unwrap()
    }

    fn observation(shade: u8) -> Observation {
        let cpu = Device::Cpu;
        let mut obs = Observation::new();
        obs.insert(
            "ee_pose".to_string(),
            Tensor::from_slice(&[0.1f32, 0.2, 0.3, 0.0], 4, &cpu).unwrap(),
        );
        obs.insert(
            "image_front".to_string(),
            Tensor::full(shade, (2, 3, 3), &cpu).unwrap(),
        );
        obs
    }

    fn space() -> ObservationSpace {
        let mut space = ObservationSpace::new();
        space.insert("ee_pose".to_string(), vec![4]);
        space.insert("image_front".to_string(), vec![2, 3, 3]);
        space
    }

    fn buffer(shades: &[u8]) -> EpisodeBuffer {
        let mut buffer = EpisodeBuffer::new(&space());
        for (i, &shade) in shades.iter().enumerate() {
            buffer.record_step(&observation(shade), &[0.0; 4], (i + 1) as f64 / 30.0);
        }
        buffer
    }

    #[test]
    fn keys_are_split_by_rank() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = assembler(dir.path());
        output.set_up_data_keys(&observation(0)).unwrap();
        assert_eq!(output.state_keys(), ["ee_pose"]);
        assert_eq!(output.image_keys(), ["image_front"]);
    }

    #[test]
    fn matrix_observation_is_rejected_at_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = assembler(dir.path());
        let mut obs = observation(0);
        obs.insert(
            "joint_jacobian".to_string(),
            Tensor::zeros((6, 4), DType::F32, &Device::Cpu).unwrap(),
        );
        match output.set_up_data_keys(&obs) {
            Err(RecordError::UnrecognisedShape { key, shape }) => {
                assert_eq!(key, "joint_jacobian");
                assert_eq!(shape, vec![6, 4]);
            }
            other => panic!("expected UnrecognisedShape, got {:?}", other.err()),
        }
    }

    #[test]
    fn empty_episode_is_skipped_without_using_an_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = assembler(dir.path());
        output.begin_run().unwrap();
        output.set_up_data_keys(&observation(0)).unwrap();

        assert!(!output.finalize_episode(0, buffer(&[])).unwrap());
        assert_eq!(output.episode_count(), 0);
        assert!(!output.paths().images_dir().join("image_front_episode_000000").exists());

        assert!(output.finalize_episode(0, buffer(&[0, 255])).unwrap());
        let dataset = output.finalize_run().unwrap();
        let ranges: Vec<_> = dataset.episode_data_index.ranges().collect();
        assert_eq!(ranges, vec![0..2]);
        assert_eq!(dataset.episode_indices().unwrap(), vec![0, 0]);
    }

    #[test]
    fn run_without_kept_episodes_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = assembler(dir.path());
        output.begin_run().unwrap();
        output.set_up_data_keys(&observation(0)).unwrap();
        output.finalize_episode(0, buffer(&[])).unwrap();
        assert!(matches!(output.finalize_run(), Err(RecordError::EmptyDataset)));
        assert!(!output.paths().train_dir().exists());
    }

    #[test]
    fn mixed_action_lengths_leave_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = assembler(dir.path());
        output.begin_run().unwrap();
        output.set_up_data_keys(&observation(0)).unwrap();

        let mut bad = EpisodeBuffer::new(&space());
        bad.record_step(&observation(0), &[0.0; 4], 1.0 / 30.0);
        bad.record_step(&observation(0), &[0.0; 3], 2.0 / 30.0);
        assert!(matches!(
            output.finalize_episode(0, bad),
            Err(RecordError::MalformedDataset(_))
        ));

        let paths = output.paths();
        assert!(!paths.images_dir().join("image_front_episode_000000").exists());
        assert!(!paths.videos_dir().join("image_front_episode_000000.mp4").exists());
        assert_eq!(output.episode_count(), 0);
    }

    #[test]
    fn image_stats_cover_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = assembler(dir.path());
        output.begin_run().unwrap();
        output.set_up_data_keys(&observation(0)).unwrap();
        output.finalize_episode(0, buffer(&[0, 255])).unwrap();
        output.finalize_episode(1, buffer(&[255, 255])).unwrap();

        let dataset = output.finalize_run().unwrap();
        let stats = &dataset.stats["observation.images.front"];
        let mean = stats.mean.to_vec1::<f32>().unwrap();
        assert!(mean.iter().all(|m| (m - 0.75).abs() < 1e-6));
        assert_eq!(stats.min.to_vec1::<f32>().unwrap(), vec![0.0; 3]);
        assert_eq!(stats.max.to_vec1::<f32>().unwrap(), vec![1.0; 3]);
    }
}

pub mod episode;
pub mod output;
pub mod replay;
pub mod stats;

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult};
use stats::FeatureStats;

pub const CODEBASE_VERSION: &str = "v1.6";

pub const STATE_KEY: &str = "observation.state";
pub const ACTION_KEY: &str = "action";
pub const EPISODE_INDEX_KEY: &str = "episode_index";
pub const FRAME_INDEX_KEY: &str = "frame_index";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const NEXT_DONE_KEY: &str = "next.done";
pub const INDEX_KEY: &str = "index";

const DATA_FILE: &str = "data.csv";
const DATASET_INFO_FILE: &str = "dataset_info.json";
const INFO_FILE: &str = "info.json";
const STATS_FILE: &str = "stats.safetensors";
const EPISODE_DATA_INDEX_FILE: &str = "episode_data_index.safetensors";

/// On-disk layout of one recorded run: `<data_root>/<run>/<repo_id>/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    root: PathBuf,
}

impl DatasetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_run(data_root: &Path, run_index: usize, repo_id: &str) -> Self {
        Self::new(data_root.join(run_index.to_string()).join(repo_id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// packaged tabular dataset
    pub fn train_dir(&self) -> PathBuf {
        self.root.join("train")
    }

    /// png frames written during collection
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// one mp4 per episode per camera
    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn meta_data_dir(&self) -> PathBuf {
        self.root.join("meta_data")
    }
}

/// Column schema of the packaged dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum Feature {
    VideoFrame,
    Sequence { length: usize, dtype: String },
    Value { dtype: String },
}

pub type Features = BTreeMap<String, Feature>;

/// Reference from a dataset row into an encoded episode video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub path: String,
    pub timestamp: f32,
}

/// Contiguous `[from, to)` row ranges, one per episode in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeDataIndex {
    pub from: Vec<usize>,
    pub to: Vec<usize>,
}

impl EpisodeDataIndex {
    pub fn push(&mut self, from: usize, to: usize) {
        self.from.push(from);
        self.to.push(to);
    }

    pub fn len(&self) -> usize {
        self.from.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_empty()
    }

    pub fn ranges(&self) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        self.from.iter().zip(self.to.iter()).map(|(&f, &t)| f..t)
    }

    fn save(&self, path: &Path) -> RecordResult<()> {
        let cpu = Device::Cpu;
        let as_tensor = |v: &[usize]| {
            let v: Vec<i64> = v.iter().map(|&x| x as i64).collect();
            let n = v.len();
            Tensor::from_vec(v, n, &cpu)
        };
        let mut tensors = HashMap::new();
        tensors.insert("from".to_string(), as_tensor(&self.from)?);
        tensors.insert("to".to_string(), as_tensor(&self.to)?);
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    fn load(path: &Path) -> RecordResult<Self> {
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let column = |name: &str| -> RecordResult<Vec<usize>> {
            let t = tensors.get(name).ok_or_else(|| {
                RecordError::MalformedDataset(format!("episode data index is missing '{name}'"))
            })?;
            Ok(t.to_vec1::<i64>()?.into_iter().map(|x| x as usize).collect())
        };
        Ok(Self {
            from: column("from")?,
            to: column("to")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub codebase_version: String,
    /// mean over episodes, leaves tolerance for the slowest video
    pub fps: f64,
    pub video: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetManifest {
    repo_id: String,
    num_rows: usize,
    features: Features,
}

/// Consolidated recording of every kept episode of one run.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub repo_id: String,
    pub paths: DatasetPaths,
    pub info: DatasetInfo,
    pub features: Features,
    pub episode_data_index: EpisodeDataIndex,
    pub stats: BTreeMap<String, FeatureStats>,
    /// `(n, state_dim)` f32
    pub observation_state: Tensor,
    /// `(n, action_dim)` f32
    pub action: Tensor,
    pub episode_index: Tensor,
    pub frame_index: Tensor,
    pub timestamp: Tensor,
    /// u8, 1 on the last frame of each episode
    pub next_done: Tensor,
    pub index: Tensor,
    /// feature key -> one reference per row
    pub video_frames: BTreeMap<String, Vec<VideoFrame>>,
}

impl Dataset {
    pub fn num_samples(&self) -> usize {
        self.index.dims().first().copied().unwrap_or(0)
    }

    pub fn num_episodes(&self) -> usize {
        self.episode_data_index.len()
    }

    pub fn actions(&self) -> RecordResult<Vec<Vec<f32>>> {
        Ok(self.action.to_vec2::<f32>()?)
    }

    pub fn episode_indices(&self) -> RecordResult<Vec<i64>> {
        Ok(self.episode_index.to_vec1::<i64>()?)
    }

    pub fn next_done_flags(&self) -> RecordResult<Vec<bool>> {
        Ok(self
            .next_done
            .to_vec1::<u8>()?
            .into_iter()
            .map(|d| d != 0)
            .collect())
    }

    /// Write `train/` and `meta_data/`.
    pub fn save_to_disk(&self) -> RecordResult<()> {
        let train_dir = self.paths.train_dir();
        let meta_dir = self.paths.meta_data_dir();
        fs::create_dir_all(&train_dir)?;
        fs::create_dir_all(&meta_dir)?;

        info!("save to disk: {}", self.paths.root().display());
        self.write_rows(&train_dir.join(DATA_FILE))?;
        let manifest = DatasetManifest {
            repo_id: self.repo_id.clone(),
            num_rows: self.num_samples(),
            features: self.features.clone(),
        };
        serde_json::to_writer_pretty(File::create(train_dir.join(DATASET_INFO_FILE))?, &manifest)?;

        serde_json::to_writer_pretty(File::create(meta_dir.join(INFO_FILE))?, &self.info)?;
        stats::save_stats(&self.stats, &meta_dir.join(STATS_FILE))?;
        self.episode_data_index
            .save(&meta_dir.join(EPISODE_DATA_INDEX_FILE))?;
        Ok(())
    }

    fn write_rows(&self, path: &Path) -> RecordResult<()> {
        let state = self.observation_state.to_vec2::<f32>()?;
        let action = self.actions()?;
        let episode_index = self.episode_indices()?;
        let frame_index = self.frame_index.to_vec1::<i64>()?;
        let timestamp = self.timestamp.to_vec1::<f32>()?;
        let done = self.next_done_flags()?;
        let index = self.index.to_vec1::<i64>()?;

        let state_dim = state.first().map_or(0, Vec::len);
        let action_dim = action.first().map_or(0, Vec::len);

        let mut header: Vec<String> = self.video_frames.keys().cloned().collect();
        header.extend((0..state_dim).map(|i| format!("{STATE_KEY}.{i}")));
        header.extend((0..action_dim).map(|i| format!("{ACTION_KEY}.{i}")));
        for key in [
            EPISODE_INDEX_KEY,
            FRAME_INDEX_KEY,
            TIMESTAMP_KEY,
            NEXT_DONE_KEY,
            INDEX_KEY,
        ] {
            header.push(key.to_string());
        }

        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&header)?;
        for row in 0..self.num_samples() {
            let mut record = Vec::with_capacity(header.len());
            for frames in self.video_frames.values() {
                record.push(serde_json::to_string(&frames[row])?);
            }
            record.extend(state[row].iter().map(f32::to_string));
            record.extend(action[row].iter().map(f32::to_string));
            record.push(episode_index[row].to_string());
            record.push(frame_index[row].to_string());
            record.push(timestamp[row].to_string());
            record.push(done[row].to_string());
            record.push(index[row].to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Read a dataset previously written by [`Dataset::save_to_disk`].
    pub fn load(root: &Path) -> RecordResult<Self> {
        let paths = DatasetPaths::new(root);
        let train_dir = paths.train_dir();
        let meta_dir = paths.meta_data_dir();
        info!("loading dataset from {}", root.display());

        let manifest: DatasetManifest =
            serde_json::from_reader(File::open(train_dir.join(DATASET_INFO_FILE))?)?;
        let info: DatasetInfo = serde_json::from_reader(File::open(meta_dir.join(INFO_FILE))?)?;
        let stats = stats::load_stats(&meta_dir.join(STATS_FILE))?;
        let episode_data_index = EpisodeDataIndex::load(&meta_dir.join(EPISODE_DATA_INDEX_FILE))?;

        let sequence_len = |key: &str| match manifest.features.get(key) {
            Some(Feature::Sequence { length, .. }) => Ok(*length),
            _ => Err(RecordError::MalformedDataset(format!(
                "feature '{key}' is not a sequence"
            ))),
        };
        let state_dim = sequence_len(STATE_KEY)?;
        let action_dim = sequence_len(ACTION_KEY)?;
        let video_keys: Vec<String> = manifest
            .features
            .iter()
            .filter(|(_, f)| **f == Feature::VideoFrame)
            .map(|(k, _)| k.clone())
            .collect();

        let mut rdr = csv::Reader::from_path(train_dir.join(DATA_FILE))?;
        let header = rdr.headers()?.clone();
        let column = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| RecordError::MalformedDataset(format!("missing column '{name}'")))
        };
        let video_cols = video_keys
            .iter()
            .map(|k| column(k))
            .collect::<RecordResult<Vec<_>>>()?;
        let state_cols = (0..state_dim)
            .map(|i| column(&format!("{STATE_KEY}.{i}")))
            .collect::<RecordResult<Vec<_>>>()?;
        let action_cols = (0..action_dim)
            .map(|i| column(&format!("{ACTION_KEY}.{i}")))
            .collect::<RecordResult<Vec<_>>>()?;
        let episode_col = column(EPISODE_INDEX_KEY)?;
        let frame_col = column(FRAME_INDEX_KEY)?;
        let timestamp_col = column(TIMESTAMP_KEY)?;
        let done_col = column(NEXT_DONE_KEY)?;
        let index_col = column(INDEX_KEY)?;

        let mut video_frames: BTreeMap<String, Vec<VideoFrame>> = BTreeMap::new();
        let mut state = Vec::new();
        let mut action = Vec::new();
        let mut episode_index = Vec::new();
        let mut frame_index = Vec::new();
        let mut timestamp = Vec::new();
        let mut next_done = Vec::new();
        let mut index = Vec::new();

        for record in rdr.records() {
            let record = record?;
            let cell = |col: usize| {
                record.get(col).ok_or_else(|| {
                    RecordError::MalformedDataset(format!("short row at column {col}"))
                })
            };
            let number = |col: usize| -> RecordResult<f64> {
                let raw = cell(col)?;
                raw.parse::<f64>().map_err(|_| {
                    RecordError::MalformedDataset(format!("'{raw}' is not a number"))
                })
            };

            for (key, &col) in video_keys.iter().zip(video_cols.iter()) {
                let frame: VideoFrame = serde_json::from_str(cell(col)?)?;
                video_frames.entry(key.clone()).or_default().push(frame);
            }
            for &col in &state_cols {
                state.push(number(col)? as f32);
            }
            for &col in &action_cols {
                action.push(number(col)? as f32);
            }
            episode_index.push(number(episode_col)? as i64);
            frame_index.push(number(frame_col)? as i64);
            timestamp.push(number(timestamp_col)? as f32);
            next_done.push(u8::from(cell(done_col)? == "true"));
            index.push(number(index_col)? as i64);
        }

        let n = index.len();
        if n != manifest.num_rows {
            return Err(RecordError::MalformedDataset(format!(
                "expected {} rows, found {n}",
                manifest.num_rows
            )));
        }

        let cpu = Device::Cpu;
        Ok(Self {
            repo_id: manifest.repo_id,
            paths,
            info,
            features: manifest.features,
            episode_data_index,
            stats,
            observation_state: Tensor::from_vec(state, (n, state_dim), &cpu)?,
            action: Tensor::from_vec(action, (n, action_dim), &cpu)?,
            episode_index: Tensor::from_vec(episode_index, n, &cpu)?,
            frame_index: Tensor::from_vec(frame_index, n, &cpu)?,
            timestamp: Tensor::from_vec(timestamp, n, &cpu)?,
            next_done: Tensor::from_vec(next_done, n, &cpu)?,
            index: Tensor::from_vec(index, n, &cpu)?,
            video_frames,
        })
    }
}

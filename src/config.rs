use std::path::PathBuf;

use clap::Parser;
use log::warn;

use crate::dataset::CODEBASE_VERSION;
use crate::dataset::output::OutputConfig;
use crate::robot::{PICK_PLACE_CUBE, RenderMode};
use crate::session::SimSettings;
use crate::video::DEFAULT_VCODEC;

const DEFAULT_DATA_DIR: &str = "data_traces";

#[derive(Parser, Debug, Clone)]
#[command(name = "teleop_dataset")]
#[command(about = "Record, replay and publish teleoperated pick-and-place datasets", long_about = None)]
pub struct Args {
    /// Simulation environment to drive
    #[arg(long, default_value = PICK_PLACE_CUBE)]
    pub env_name: String,

    /// Teleop backend, only 'keyboard' is available
    #[arg(long, default_value = "keyboard")]
    pub teleop_method: String,

    /// Threads used to write image frames
    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    #[arg(long, default_value = "myrepo")]
    pub repo_id: String,

    /// Upload every finished dataset to the hub
    #[arg(long)]
    pub push_to_hub: bool,

    /// Revision label used next to 'main' on the hub
    #[arg(long, default_value = CODEBASE_VERSION)]
    pub revision: String,

    /// Root of all recorded runs
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// ffmpeg codec for episode videos
    #[arg(long, default_value = DEFAULT_VCODEC)]
    pub vcodec: String,

    #[arg(long, value_enum, default_value_t = RenderMode::Human)]
    pub render_mode: RenderMode,

    /// Seed for action sampling and cube placement
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Args {
    pub fn data_root(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                warn!("DATA_DIR is not set, writing to '{DEFAULT_DATA_DIR}'");
                PathBuf::from(DEFAULT_DATA_DIR)
            }
        }
    }

    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            data_root: self.data_root(),
            repo_id: self.repo_id.clone(),
            num_workers: self.num_workers,
            push_to_hub: self.push_to_hub,
            revision: self.revision.clone(),
        }
    }

    pub fn sim_settings(&self) -> SimSettings {
        SimSettings {
            env_name: self.env_name.clone(),
            render_mode: self.render_mode,
            seed: self.seed,
        }
    }
}

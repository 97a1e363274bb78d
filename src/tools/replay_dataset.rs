use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;

use teleop_dataset::dataset::Dataset;
use teleop_dataset::dataset::output::{OutputAssembler, OutputConfig};
use teleop_dataset::hub::HuggingFaceCli;
use teleop_dataset::robot::{CubeProp, PICK_PLACE_CUBE, PropConfig, RenderMode};
use teleop_dataset::session::{Session, SimSettings, TaskParameters};
use teleop_dataset::teleop::EpisodeState;
use teleop_dataset::video::{DEFAULT_VCODEC, FfmpegEncoder};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Cube {
    Red,
    Green,
    Blue,
}

impl From<Cube> for CubeProp {
    fn from(cube: Cube) -> Self {
        match cube {
            Cube::Red => CubeProp::Red,
            Cube::Green => CubeProp::Green,
            Cube::Blue => CubeProp::Blue,
        }
    }
}

/// Replay the actions of a recorded dataset into a freshly recorded run.
#[derive(Parser, Debug)]
#[command(name = "replay_dataset")]
struct Cli {
    /// Dataset root, i.e. `<data_dir>/<run>/<repo_id>`
    source: PathBuf,

    #[arg(long, default_value = "green")]
    cube: Cube,

    #[arg(long, env = "DATA_DIR", default_value = "data_traces")]
    data_dir: PathBuf,

    #[arg(long, default_value = "replayed")]
    repo_id: String,

    #[arg(long, default_value = PICK_PLACE_CUBE)]
    env_name: String,

    #[arg(long, default_value_t = 1)]
    num_workers: usize,

    #[arg(long, default_value = DEFAULT_VCODEC)]
    vcodec: String,

    #[arg(long, value_enum, default_value_t = RenderMode::Off)]
    render_mode: RenderMode,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let source = Dataset::load(&cli.source)?;
    info!(
        "loaded {} frames in {} episodes from {}",
        source.num_samples(),
        source.num_episodes(),
        cli.source.display()
    );

    let output = OutputAssembler::new(
        OutputConfig {
            data_root: cli.data_dir.clone(),
            repo_id: cli.repo_id.clone(),
            num_workers: cli.num_workers,
            push_to_hub: false,
            revision: source.info.codebase_version.clone(),
        },
        Box::new(FfmpegEncoder::new(cli.vcodec.clone())),
        Box::new(HuggingFaceCli::default()),
    )?;
    let settings = SimSettings {
        env_name: cli.env_name.clone(),
        render_mode: cli.render_mode,
        seed: None,
    };
    let mut session = Session::new(Arc::new(EpisodeState::new()), output, settings);

    let replayed = session.replay_dataset_actions_in_sim(
        Some(&source),
        TaskParameters {
            prop: PropConfig {
                cube: cli.cube.into(),
            },
        },
    )?;
    println!(
        "Replayed {} episodes into {}",
        replayed.num_episodes(),
        replayed.paths.root().display()
    );
    Ok(())
}

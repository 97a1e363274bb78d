use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::error;

use teleop_dataset::config::Args;
use teleop_dataset::dataset::output::OutputAssembler;
use teleop_dataset::hub::HuggingFaceCli;
use teleop_dataset::robot::{self, CubeProp, PropConfig};
use teleop_dataset::session::{Session, TaskParameters};
use teleop_dataset::teleop::{self, EpisodeState};
use teleop_dataset::video::FfmpegEncoder;

fn task(cube: CubeProp) -> TaskParameters {
    TaskParameters {
        prop: PropConfig { cube },
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let output = OutputAssembler::new(
        args.output_config(),
        Box::new(FfmpegEncoder::new(args.vcodec.clone())),
        Box::new(HuggingFaceCli::default()),
    )?;
    let state = Arc::new(EpisodeState::new());
    let mut session = Session::new(state.clone(), output, args.sim_settings());

    // fail before grabbing the keyboard when the env name is wrong
    if let Err(e) = robot::ensure_registered(&args.env_name) {
        error!("{e}");
        std::process::exit(1);
    }

    let teleop = teleop::set_up_teleop(&args.teleop_method, state)?;

    println!("Recording initial dataset w/ teleop\r");
    let recorded = session.teleop_robot_and_record_data(task(CubeProp::Red));

    // restore the terminal before reporting anything
    teleop.stop()?;
    let recorded = recorded?;

    println!("Replaying from previous dataset (from disk)");
    session.replay_dataset_actions_in_sim(None, task(CubeProp::Green))?;

    println!("Replaying from dataset (in memory)");
    session.replay_dataset_actions_in_sim(Some(&recorded), task(CubeProp::Blue))?;

    Ok(())
}

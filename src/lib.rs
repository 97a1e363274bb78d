pub mod config;
pub mod dataset;
pub mod error;
pub mod hub;
pub mod robot;
pub mod session;
pub mod teleop;
pub mod utils;
pub mod video;

pub use error::{RecordError, RecordResult};

pub mod keyboard;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{RecordError, RecordResult};
pub use keyboard::{KeyboardTeleop, TeleopKey, on_press, on_release};

/// Positional increment per key press, meters
pub const POSITION_STEP: f32 = 0.01;
/// Gripper increment per key press
pub const GRIPPER_STEP: f32 = 0.1;

pub const AXIS_X: usize = 0;
pub const AXIS_Y: usize = 1;
pub const AXIS_Z: usize = 2;
pub const AXIS_GRIPPER: usize = 3;

/// Flags and action vector shared between the input thread and the control loop.
#[derive(Debug, Default)]
pub struct EpisodeState {
    action: Mutex<Option<Vec<f32>>>,
    dropping: AtomicBool,
    concluding: AtomicBool,
    stopping: AtomicBool,
}

impl EpisodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// clears drop and conclude, called at the start of each episode
    pub fn begin_episode(&self) {
        self.dropping.store(false, Ordering::SeqCst);
        self.concluding.store(false, Ordering::SeqCst);
    }

    pub fn reset_run(&self) {
        self.stopping.store(false, Ordering::SeqCst);
    }

    pub fn set_action(&self, action: Option<Vec<f32>>) {
        *self.lock_action() = action;
    }

    /// Copy of the current teleop action.
    pub fn action(&self) -> Option<Vec<f32>> {
        self.lock_action().clone()
    }

    /// Add `delta` to one component, returns false when no action is set.
    pub fn nudge(&self, axis: usize, delta: f32) -> bool {
        match self.lock_action().as_mut().and_then(|a| a.get_mut(axis)) {
            Some(value) => {
                *value += delta;
                true
            }
            None => false,
        }
    }

    pub fn drop_episode(&self) {
        self.dropping.store(true, Ordering::SeqCst);
        self.concluding.store(true, Ordering::SeqCst);
    }

    pub fn conclude(&self) {
        self.concluding.store(true, Ordering::SeqCst);
    }

    pub fn conclude_and_stop(&self) {
        self.concluding.store(true, Ordering::SeqCst);
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_dropping(&self) -> bool {
        self.dropping.load(Ordering::SeqCst)
    }

    pub fn is_concluding(&self) -> bool {
        self.concluding.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn lock_action(&self) -> std::sync::MutexGuard<'_, Option<Vec<f32>>> {
        // a panicked input thread leaves plain floats behind, still usable
        self.action.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Running teleop backend, stopped during teardown.
pub trait TeleopHandle {
    fn stop(self: Box<Self>) -> RecordResult<()>;
}

pub fn print_controls() {
    println!("Keyboard controls:");
    println!("*      UP|DOWN       : move hand  forwards|backwards (+y|-y)");
    println!("*    LEFT|RIGHT      : move hand      left|right     (-x|+x)");
    println!("* PAGE UP|PAGE DOWN  : move hand        up|down      (+z|-z)");
    println!("*     CMD|SHIFT      : move gripper  close|open");
    println!("* DELETE             : Discard Episode and reset env");
    println!("* HOME               : Save episode and reset env");
    println!("* END                : Save episode and end data collection");
    println!("* ESC                : Stop data collection");
}

/// Start the requested teleop backend against the shared state.
pub fn set_up_teleop(
    teleop_method: &str,
    state: std::sync::Arc<EpisodeState>,
) -> RecordResult<Box<dyn TeleopHandle>> {
    match teleop_method {
        "keyboard" => {
            log::info!("Setting up keyboard teleop...");
            print_controls();
            Ok(Box::new(KeyboardTeleop::start(state)?))
        }
        other => Err(RecordError::UnsupportedTeleopMethod(other.to_string())),
    }
}

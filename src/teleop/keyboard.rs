use std::io::stdout;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    ModifierKeyCode, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use log::{debug, warn};

use super::{
    AXIS_GRIPPER, AXIS_X, AXIS_Y, AXIS_Z, EpisodeState, GRIPPER_STEP, POSITION_STEP, TeleopHandle,
};
use crate::error::RecordResult;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleopKey {
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Cmd,
    Shift,
    Delete,
    Home,
    End,
    Esc,
}

impl TeleopKey {
    pub fn from_key_code(code: KeyCode) -> Option<Self> {
        let key = match code {
            KeyCode::Up => TeleopKey::Up,
            KeyCode::Down => TeleopKey::Down,
            KeyCode::Left => TeleopKey::Left,
            KeyCode::Right => TeleopKey::Right,
            KeyCode::PageUp => TeleopKey::PageUp,
            KeyCode::PageDown => TeleopKey::PageDown,
            KeyCode::Modifier(
                ModifierKeyCode::LeftSuper
                | ModifierKeyCode::RightSuper
                | ModifierKeyCode::LeftMeta
                | ModifierKeyCode::RightMeta,
            ) => TeleopKey::Cmd,
            KeyCode::Modifier(ModifierKeyCode::LeftShift | ModifierKeyCode::RightShift) => {
                TeleopKey::Shift
            }
            KeyCode::Delete => TeleopKey::Delete,
            KeyCode::Home => TeleopKey::Home,
            KeyCode::End => TeleopKey::End,
            KeyCode::Esc => TeleopKey::Esc,
            _ => return None,
        };
        Some(key)
    }
}

/// Apply a key press to the shared state. Action values are not bounds checked.
pub fn on_press(key: TeleopKey, state: &EpisodeState) {
    let (axis, delta) = match key {
        // Y
        TeleopKey::Up => (AXIS_Y, POSITION_STEP),
        TeleopKey::Down => (AXIS_Y, -POSITION_STEP),
        // X
        TeleopKey::Left => (AXIS_X, -POSITION_STEP),
        TeleopKey::Right => (AXIS_X, POSITION_STEP),
        // Z
        TeleopKey::PageDown => (AXIS_Z, -POSITION_STEP),
        TeleopKey::PageUp => (AXIS_Z, POSITION_STEP),
        // Gripper
        TeleopKey::Cmd => (AXIS_GRIPPER, -GRIPPER_STEP),
        TeleopKey::Shift => (AXIS_GRIPPER, GRIPPER_STEP),
        // Episode lifecycle
        TeleopKey::Delete => return state.drop_episode(),
        TeleopKey::Home => return state.conclude(),
        TeleopKey::End => return state.conclude_and_stop(),
        TeleopKey::Esc => return,
    };
    state.nudge(axis, delta);
}

/// Apply a key release. Returns false once the listener should end.
pub fn on_release(key: TeleopKey, state: &EpisodeState) -> bool {
    if key == TeleopKey::Esc {
        state.stop();
        return false;
    }
    true
}

/// Route one terminal key event. Returns false once the listener should end.
///
/// Terminals without the keyboard enhancement protocol never report releases,
/// so an Esc press stands in for its release there.
pub fn handle_key_event(event: KeyEvent, state: &EpisodeState, releases_reported: bool) -> bool {
    // raw mode swallows SIGINT
    if event.code == KeyCode::Char('c') && event.modifiers.contains(KeyModifiers::CONTROL) {
        return on_release(TeleopKey::Esc, state);
    }

    let Some(key) = TeleopKey::from_key_code(event.code) else {
        return true;
    };
    match event.kind {
        KeyEventKind::Press | KeyEventKind::Repeat => {
            on_press(key, state);
            if !releases_reported && key == TeleopKey::Esc {
                return on_release(key, state);
            }
            true
        }
        KeyEventKind::Release => on_release(key, state),
    }
}

/// Background listener translating terminal key events into episode state changes.
pub struct KeyboardTeleop {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    enhanced: bool,
}

impl KeyboardTeleop {
    pub fn start(state: Arc<EpisodeState>) -> RecordResult<Self> {
        enable_raw_mode()?;
        let enhanced = supports_keyboard_enhancement().unwrap_or(false);
        if enhanced {
            execute!(
                stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                )
            )?;
        } else {
            warn!("terminal does not report key releases or modifier keys, gripper keys disabled");
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || listen(&state, &flag, enhanced));

        Ok(Self {
            shutdown,
            handle: Some(handle),
            enhanced,
        })
    }

    fn teardown(&mut self) -> RecordResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::Relaxed);
        if handle.join().is_err() {
            warn!("keyboard listener panicked");
        }
        if self.enhanced {
            execute!(stdout(), PopKeyboardEnhancementFlags)?;
        }
        disable_raw_mode()?;
        Ok(())
    }
}

impl TeleopHandle for KeyboardTeleop {
    fn stop(mut self: Box<Self>) -> RecordResult<()> {
        self.teardown()
    }
}

impl Drop for KeyboardTeleop {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

fn listen(state: &EpisodeState, shutdown: &AtomicBool, releases_reported: bool) {
    while !shutdown.load(Ordering::Relaxed) {
        match event::poll(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("keyboard listener stopped: {e}");
                return;
            }
        }
        let key = match event::read() {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                warn!("keyboard listener stopped: {e}");
                return;
            }
        };
        if !handle_key_event(key, state, releases_reported) {
            debug!("keyboard listener released by escape");
            return;
        }
    }
}

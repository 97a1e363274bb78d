use std::io::{self, Stdout};

use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::crossterm::execute;
use ratatui::crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::layout::{Constraint, Layout};
use ratatui::style::Color;
use ratatui::symbols::Marker;
use ratatui::widgets::canvas::{Canvas, Circle, Points, Rectangle};
use ratatui::widgets::{Block, Paragraph};

/// Everything the human render mode needs from one simulator frame.
#[derive(Debug, Clone, Copy)]
pub struct SceneSnapshot {
    pub ee: [f32; 3],
    pub gripper: f32,
    pub cube: [f32; 3],
    pub cube_rgb: [u8; 3],
    pub goal: [f32; 2],
    pub grasped: bool,
    pub time: f64,
    pub reward: f32,
}

/// Top-down view of the table drawn on the alternate screen.
pub struct TerminalView {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalView {
    pub fn new() -> io::Result<Self> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }

    pub fn draw(&mut self, scene: &SceneSnapshot) -> io::Result<()> {
        self.terminal.draw(|frame| {
            let chunks = Layout::vertical([Constraint::Min(6), Constraint::Length(3)])
                .split(frame.area());

            let [r, g, b] = scene.cube_rgb;
            let canvas = Canvas::default()
                .block(Block::bordered().title("PickPlaceCube (top view)"))
                .marker(Marker::Braille)
                .x_bounds([-0.25, 0.25])
                .y_bounds([0.0, 0.4])
                .paint(|ctx| {
                    ctx.draw(&Circle {
                        x: scene.goal[0] as f64,
                        y: scene.goal[1] as f64,
                        radius: 0.03,
                        color: Color::Gray,
                    });
                    ctx.draw(&Rectangle {
                        x: (scene.cube[0] - 0.0125) as f64,
                        y: (scene.cube[1] - 0.0125) as f64,
                        width: 0.025,
                        height: 0.025,
                        color: Color::Rgb(r, g, b),
                    });
                    ctx.draw(&Points {
                        coords: &[(scene.ee[0] as f64, scene.ee[1] as f64)],
                        color: if scene.grasped {
                            Color::Yellow
                        } else {
                            Color::White
                        },
                    });
                });
            frame.render_widget(canvas, chunks[0]);

            let status = format!(
                "t={:6.2}s  ee=({:+.3}, {:+.3}, {:+.3})  gripper={:+.2}  reward={:+.3}",
                scene.time, scene.ee[0], scene.ee[1], scene.ee[2], scene.gripper, scene.reward
            );
            frame.render_widget(Paragraph::new(status).block(Block::bordered()), chunks[1]);
        })?;
        Ok(())
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        // best effort, the terminal may already be gone
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

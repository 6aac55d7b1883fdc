//! Full-screen terminal UI sink.
//!
//! Three panes: scrolling chat, peer list, input line. The render
//! loop runs on a blocking thread; the [`Sink`] implementation only
//! appends to shared state, so the runtime never waits on the
//! terminal.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use meshchat_node::Sink;
use meshchat_proto::Record;
use meshchat_types::{MeshError, Notification, Presence, Result};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::Terminal;
use tokio::sync::watch;

/// How many rendered lines the chat pane retains.
const MAX_LINES: usize = 500;

/// Input poll cadence; also bounds redraw latency.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct TuiState {
    lines: Vec<String>,
    peers: Vec<Presence>,
    input: String,
}

/// Ratatui-based chat surface.
pub struct TuiDisplay {
    state: Arc<Mutex<TuiState>>,
    submit: Arc<dyn Fn(String) + Send + Sync>,
    on_quit: Arc<dyn Fn() + Send + Sync>,
}

impl TuiDisplay {
    /// Creates the TUI sink. `submit` receives entered lines;
    /// `on_quit` fires when the user exits with Esc or Ctrl-C.
    pub fn new(
        submit: Arc<dyn Fn(String) + Send + Sync>,
        on_quit: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(TuiState::default())),
            submit,
            on_quit,
        })
    }

    fn push_line(&self, line: String) {
        let mut state = self.state.lock().expect("tui state lock");
        state.lines.push(line);
        let overflow = state.lines.len().saturating_sub(MAX_LINES);
        if overflow > 0 {
            state.lines.drain(..overflow);
        }
    }

    /// Runs the render/input loop until quit or shutdown. Blocking;
    /// call from a dedicated thread.
    pub fn run(&self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let mut terminal = init_terminal()?;
        let result = self.event_loop(&mut terminal, shutdown_rx);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(
        &self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }
            terminal
                .draw(|frame| self.render(frame))
                .map_err(|e| MeshError::ConfigError {
                    reason: format!("terminal draw: {e}"),
                })?;

            if !event::poll(POLL_INTERVAL).unwrap_or(false) {
                continue;
            }
            let Ok(Event::Key(key)) = event::read() else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Esc => {
                    (self.on_quit)();
                    return Ok(());
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    (self.on_quit)();
                    return Ok(());
                }
                KeyCode::Enter => {
                    let line = {
                        let mut state = self.state.lock().expect("tui state lock");
                        std::mem::take(&mut state.input)
                    };
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        (self.submit)(line);
                    }
                }
                KeyCode::Backspace => {
                    self.state.lock().expect("tui state lock").input.pop();
                }
                KeyCode::Char(c) => {
                    self.state.lock().expect("tui state lock").input.push(c);
                }
                _ => {}
            }
        }
    }

    fn render(&self, frame: &mut ratatui::Frame) {
        let state = self.state.lock().expect("tui state lock");
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),
                Constraint::Length(8),
                Constraint::Length(3),
            ])
            .split(frame.area());

        let visible = chunks[0].height.saturating_sub(2) as usize;
        let start = state.lines.len().saturating_sub(visible);
        let lines: Vec<Line> = state.lines[start..]
            .iter()
            .map(|l| Line::from(l.as_str()))
            .collect();
        frame.render_widget(
            Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Chat")),
            chunks[0],
        );

        let peers: Vec<ListItem> = state
            .peers
            .iter()
            .map(|p| {
                let name = if p.name.is_empty() { &p.addr } else { &p.name };
                let style = if p.online {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                ListItem::new(format!("{name} ({})", p.addr)).style(style)
            })
            .collect();
        frame.render_widget(
            List::new(peers).block(Block::default().borders(Borders::ALL).title("Peers")),
            chunks[1],
        );

        frame.render_widget(
            Paragraph::new(format!("> {}", state.input))
                .block(Block::default().borders(Borders::ALL).title("Input")),
            chunks[2],
        );
    }
}

impl Sink for TuiDisplay {
    fn show_message(&self, record: &Record) {
        let ts = record.timestamp.format("%H:%M:%S");
        let label = match record.kind.as_str() {
            "dm" => " [DM]",
            "file" => " [FILE]",
            _ => "",
        };
        let mut line = format!("[{ts}] {}{label}: {}", record.from, record.content);
        if !record.attachments.is_empty() {
            let names: Vec<&str> = record
                .attachments
                .iter()
                .map(|a| if a.name.is_empty() { a.id.as_str() } else { a.name.as_str() })
                .collect();
            line.push_str(&format!(" (files: {})", names.join(", ")));
        }
        self.push_line(line);
    }

    fn show_system(&self, text: &str) {
        self.push_line(format!("-- {text}"));
    }

    fn update_peers(&self, peers: &[Presence]) {
        self.state.lock().expect("tui state lock").peers = peers.to_vec();
    }

    fn show_notification(&self, note: &Notification) {
        self.push_line(format!("!! [{}] {}", note.level, note.text));
    }
}

fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().map_err(|e| MeshError::ConfigError {
        reason: format!("enable raw mode: {e}"),
    })?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).map_err(|e| MeshError::ConfigError {
        reason: format!("enter alternate screen: {e}"),
    })?;
    Terminal::new(CrosstermBackend::new(stdout)).map_err(|e| MeshError::ConfigError {
        reason: format!("create terminal: {e}"),
    })
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().map_err(|e| MeshError::ConfigError {
        reason: format!("disable raw mode: {e}"),
    })?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).map_err(|e| {
        MeshError::ConfigError {
            reason: format!("leave alternate screen: {e}"),
        }
    })?;
    terminal.show_cursor().map_err(|e| MeshError::ConfigError {
        reason: format!("show cursor: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> Arc<TuiDisplay> {
        TuiDisplay::new(Arc::new(|_line| {}), Arc::new(|| {}))
    }

    #[test]
    fn messages_accumulate_with_labels() {
        let tui = display();
        let record = Record {
            kind: "dm".into(),
            from: "alice".into(),
            content: "psst".into(),
            timestamp: chrono::Utc::now(),
            ..Record::default()
        };
        tui.show_message(&record);
        let state = tui.state.lock().expect("state");
        assert!(state.lines[0].contains("alice [DM]: psst"));
    }

    #[test]
    fn chat_pane_is_bounded() {
        let tui = display();
        for i in 0..(MAX_LINES + 50) {
            tui.show_system(&format!("line {i}"));
        }
        assert_eq!(tui.state.lock().expect("state").lines.len(), MAX_LINES);
    }

    #[test]
    fn peer_updates_replace_the_list() {
        let tui = display();
        tui.update_peers(&[Presence {
            name: "bob".into(),
            addr: "127.0.0.1:9002".into(),
            online: true,
        }]);
        tui.update_peers(&[]);
        assert!(tui.state.lock().expect("state").peers.is_empty());
    }
}

// src/tui/mod.rs
use crate::config::AppConfig;
use crate::core::engine::OperatorCommand;
use crate::types::{ControllerSnapshot, UiEvent};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use std::{io, time::Duration};
use tokio::sync::mpsc;

const MAX_LOGS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleActive,
    ReloadConfig,
    Quit,
}

/// Raw mode swallows SIGINT, so Ctrl+C arrives here as a key.
pub fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }
    match key.code {
        KeyCode::Char('a') => Some(KeyAction::ToggleActive),
        KeyCode::Char('r') => Some(KeyAction::ReloadConfig),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

pub struct App {
    pub symbol: String,
    pub snapshot: ControllerSnapshot,
    pub logs: Vec<String>,
}

impl App {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            snapshot: ControllerSnapshot::default(),
            logs: Vec::new(),
        }
    }

    pub fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Snapshot(s) => self.snapshot = s,
            UiEvent::Log(msg) => self.push_log(msg),
        }
    }

    pub fn push_log(&mut self, msg: String) {
        self.logs.push(msg);
        if self.logs.len() > MAX_LOGS {
            self.logs.remove(0);
        }
    }

    /// Turns a key press into the command for the engine, if any.
    pub fn on_key(&mut self, action: KeyAction) -> Option<OperatorCommand> {
        match action {
            KeyAction::ToggleActive => Some(OperatorCommand::ToggleActive),
            KeyAction::Quit => {
                self.push_log("shutdown requested".to_string());
                Some(OperatorCommand::Shutdown)
            }
            KeyAction::ReloadConfig => match AppConfig::load("Settings") {
                Ok(cfg) => {
                    self.push_log("config reloaded".to_string());
                    Some(OperatorCommand::ReplaceConfig(Box::new(cfg.bot)))
                }
                Err(e) => {
                    self.push_log(format!("config reload failed: {}", e));
                    None
                }
            },
        }
    }
}

pub fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
}

pub async fn run(
    mut rx: mpsc::Receiver<UiEvent>,
    commands: mpsc::Sender<OperatorCommand>,
    symbol: String,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(symbol);

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(action) = key_action(key) {
                        if let Some(cmd) = app.on_key(action) {
                            // engine gone means nothing left to control
                            if commands.send(cmd).await.is_err() {
                                break;
                            }
                        }
                        if action == KeyAction::Quit {
                            break;
                        }
                    }
                }
            }
        }

        loop {
            match rx.try_recv() {
                Ok(event) => app.on_event(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    restore_terminal();
                    return Ok(());
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

fn opt(value: Option<impl ToString>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn ui(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(10),
            ]
            .as_ref(),
        )
        .split(f.size());

    let s = &app.snapshot;
    let price_text = match s.last_price {
        Some(p) => format!("{}", p),
        None => "Waiting for data...".to_string(),
    };
    let (active_text, active_color) = if s.active {
        ("ACTIVE", Color::Green)
    } else {
        ("PAUSED", Color::Red)
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!("Stop-Limit Bot [{}]", app.symbol),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | Price: "),
        Span::styled(
            price_text,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(active_text, Style::default().fg(active_color)),
        Span::raw(if s.in_session {
            " | in session"
        } else {
            " | out of session"
        }),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Status  [a] toggle  [r] reload  [q] quit"),
    );
    f.render_widget(header, chunks[0]);

    let mut rows = vec![
        Line::from(format!("Mode:        {}", s.mode)),
        Line::from(format!(
            "Pending:     {} {}",
            opt(s.pending_side),
            opt(s.pending_order_id.as_deref())
        )),
    ];
    match &s.position {
        Some(p) => {
            rows.push(Line::from(format!(
                "Position:    {} {} @ {}",
                p.side, p.quantity, p.entry_price
            )));
            rows.push(Line::from(Span::styled(
                format!("Stop:        {}", p.stop_loss_price),
                Style::default().fg(Color::Magenta),
            )));
            if let Some(price) = s.last_price {
                rows.push(Line::from(format!("Profit/unit: {}", p.profit_at(price))));
            }
        }
        None => rows.push(Line::from("Position:    flat")),
    }
    let state =
        Paragraph::new(rows).block(Block::default().borders(Borders::ALL).title("Controller"));
    f.render_widget(state, chunks[1]);

    let logs: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|s| ListItem::new(Line::from(Span::raw(s))))
        .collect();

    let logs_list =
        List::new(logs).block(Block::default().borders(Borders::ALL).title("System Logs"));
    f.render_widget(logs_list, chunks[2]);
}

//! parley-tui: Terminal UI for the parley chat client
//!
//! This crate provides the interactive front end:
//! - A chat screen (transcript, prompt input, status bar)
//! - Help and reset confirmation overlays
//! - The event loop that feeds keys, backend results and reveal ticks
//!   into the engine session

mod app;
mod event;
mod screens;
#[cfg(test)]
pub mod test_utils;
mod ui;

use screens::Screen as ScreenTrait;

pub use app::{App, Completion};
pub use event::{Action, Event, EventHandler};
pub use parley_engine;

use crossterm::{
    cursor::Show as ShowCursor,
    event::{DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parley_engine::{data_dir, Config, FileStore, HttpBackend, KeyValueStore, MemoryStore};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};
use std::io::{self, stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

/// Event poll / tick rate (4 Hz).
const TICK_RATE_MS: u64 = 250;

/// RAII guard for terminal state restoration.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            stdout(),
            DisableBracketedPaste,
            DisableMouseCapture,
            LeaveAlternateScreen,
            ShowCursor
        );
    }
}

/// Run the TUI application.
///
/// Sets up the terminal, runs the event loop, and restores the terminal on
/// exit (including on error).
pub async fn run_tui(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = HttpBackend::from_config(&config)?;
    info!(base_url = backend.base_url(), "Starting TUI");

    let store: Box<dyn KeyValueStore> = if let Some(store) = FileStore::in_data_dir() {
        Box::new(store)
    } else {
        warn!("No data directory; identity will not survive restarts");
        Box::new(MemoryStore::new())
    };
    let export_dir = data_dir().map(|dir| dir.join("transcripts"));
    let reveal_interval = config.reveal_interval();

    let mut app = App::new(&config, Arc::new(backend), store, export_dir);

    enable_raw_mode()?;
    let _guard = TerminalGuard;

    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut events = EventHandler::new(TICK_RATE_MS);
    app.start();

    let result = run_loop(&mut terminal, &mut app, &mut events, reveal_interval).await;

    terminal.show_cursor()?;

    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    events: &mut EventHandler,
    reveal_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reveal_timer: Option<Interval> = None;

    loop {
        terminal.draw(|frame| draw(frame, app))?;

        if app.should_quit {
            break;
        }

        // Pace the reveal only while one is running.
        if app.is_revealing() {
            if reveal_interval.is_zero() {
                while app.is_revealing() {
                    app.reveal_tick();
                }
                continue;
            }
            if reveal_timer.is_none() {
                let mut timer = interval_at(Instant::now() + reveal_interval, reveal_interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                reveal_timer = Some(timer);
            }
        } else {
            reveal_timer = None;
        }

        tokio::select! {
            event = events.next() => match event {
                Some(Event::Key(key)) => app.handle_key(key),
                Some(Event::Mouse(mouse)) => app.handle_mouse(mouse),
                Some(Event::Paste(text)) => app.handle_paste(&text),
                Some(Event::Tick) => app.tick(),
                // The next draw picks up the new size.
                Some(Event::Resize(_, _)) => {}
                None => break,
            },
            Some(completion) = app.next_completion() => app.apply_completion(completion),
            () = next_reveal_tick(&mut reveal_timer) => app.reveal_tick(),
        }
    }

    Ok(())
}

async fn next_reveal_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Draw the chat screen and any open overlay.
pub fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();
    let buf = frame.buffer_mut();

    screens::chat::ChatScreen.render(app, area, buf);

    if app.confirm_reset {
        screens::render_reset_confirm(area, buf);
    }
    if app.show_help {
        screens::render_help_overlay(area, buf);
    }
}

/// Get the TUI version.
pub fn tui_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Terminal input events and key bindings.

use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyModifiers, MouseEvent};
use std::time::Duration;
use tokio::sync::mpsc;

/// Events that can occur in the TUI.
#[derive(Debug, Clone)]
pub enum Event {
    Key(KeyEvent),
    Mouse(MouseEvent),
    /// Bracketed paste.
    Paste(String),
    /// Periodic tick for notifications and the spinner.
    Tick,
    Resize(u16, u16),
}

/// Polls crossterm on a background thread and forwards events.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    _tx: mpsc::UnboundedSender<Event>,
}

impl EventHandler {
    /// Create a handler that sends a tick every `tick_rate_ms` without input.
    pub fn new(tick_rate_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let tx_clone = tx.clone();

        // crossterm polling is blocking I/O.
        std::thread::spawn(move || {
            let tick_rate = Duration::from_millis(tick_rate_ms);
            loop {
                let event = if event::poll(tick_rate).unwrap_or(false) {
                    match event::read() {
                        Ok(CrosstermEvent::Key(key)) => Some(Event::Key(key)),
                        Ok(CrosstermEvent::Mouse(mouse)) => Some(Event::Mouse(mouse)),
                        Ok(CrosstermEvent::Paste(text)) => Some(Event::Paste(text)),
                        Ok(CrosstermEvent::Resize(w, h)) => Some(Event::Resize(w, h)),
                        _ => None,
                    }
                } else {
                    Some(Event::Tick)
                };
                if let Some(event) = event {
                    if tx_clone.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        Self { rx, _tx: tx }
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// What a key press asks the app to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Help,
    Send,
    Newline,
    Reset,
    Export,
    Confirm,
    Back,
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    /// Jump to the newest message and resume following.
    Follow,
    None,
}

/// Map a key to an app-level action.
///
/// Keys that edit the prompt are handled by the app before this is consulted;
/// `input_empty` decides whether `?` opens help or is typed.
pub fn key_to_action(key: KeyEvent, input_empty: bool) -> Action {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);

    if ctrl {
        return match key.code {
            KeyCode::Char('c' | 'q') => Action::Quit,
            KeyCode::Char('r') => Action::Reset,
            KeyCode::Char('e') => Action::Export,
            KeyCode::Enter | KeyCode::Char('j') => Action::Newline,
            KeyCode::End => Action::Follow,
            _ => Action::None,
        };
    }

    match key.code {
        KeyCode::Enter if shift => Action::Newline,
        KeyCode::Enter => Action::Send,
        KeyCode::F(1) => Action::Help,
        KeyCode::Char('?') if input_empty => Action::Help,
        KeyCode::Esc => Action::Back,
        KeyCode::PageUp => Action::PageUp,
        KeyCode::PageDown => Action::PageDown,
        KeyCode::Up => Action::ScrollUp,
        KeyCode::Down => Action::ScrollDown,
        KeyCode::End => Action::Follow,
        _ => Action::None,
    }
}

/// Map a key while a confirmation dialog is open.
pub fn confirm_key_to_action(key: KeyEvent) -> Action {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Action::Quit;
    }
    match key.code {
        KeyCode::Char('y' | 'Y') | KeyCode::Enter => Action::Confirm,
        KeyCode::Char('n' | 'N') | KeyCode::Esc => Action::Back,
        _ => Action::None,
    }
}

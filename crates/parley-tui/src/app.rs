//! Application state for the parley TUI.
//!
//! [`App`] owns the engine [`Session`] and routes key presses and backend
//! completions into its transition functions. Rendering only reads from it.

use crate::event::{confirm_key_to_action, key_to_action, Action};
use crate::ui::widgets::TextInputState;
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use parley_engine::transcript::{export_file_name, render_markdown, write_transcript};
use parley_engine::{
    bounded, identity, AskRequest, Backend, BackendError, Config, HistoryOutcome,
    HistoryRequest, KeyValueStore, Message, ReplyOutcome, RevealProgress, Session, Ticket,
};
use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Rows moved by PageUp / PageDown.
const PAGE_ROWS: usize = 10;

/// Ticks a notification stays visible (~3 seconds at 4 Hz).
const NOTIFICATION_TICKS: usize = 12;

/// Result of a backend task, delivered back to the event loop.
#[derive(Debug)]
pub enum Completion {
    History {
        ticket: Ticket,
        result: Result<Vec<Message>, BackendError>,
    },
    Reply {
        ticket: Ticket,
        result: Result<String, BackendError>,
    },
}

/// Application state.
pub struct App {
    pub should_quit: bool,

    /// Whether the help overlay is visible.
    pub show_help: bool,

    /// Whether the reset confirmation dialog is open.
    pub confirm_reset: bool,

    /// The conversation.
    pub session: Session,

    /// Prompt being typed.
    pub input_state: TextInputState,

    /// Transcript rows scrolled back from the bottom; 0 follows new content.
    pub scroll_back: usize,

    /// Largest scroll-back the last render allowed.
    pub transcript_max_scroll: Cell<usize>,

    /// Notification message (cleared after some ticks).
    pub notification: Option<String>,
    notification_ttl: usize,

    /// Tick counter for the spinner.
    pub tick: usize,

    store: Box<dyn KeyValueStore>,
    backend: Arc<dyn Backend>,
    history_timeout: Duration,
    ask_timeout: Duration,
    export_dir: Option<PathBuf>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl App {
    /// Create an app. Call [`App::start`] once inside the runtime.
    pub fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        store: Box<dyn KeyValueStore>,
        export_dir: Option<PathBuf>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            should_quit: false,
            show_help: false,
            confirm_reset: false,
            session: Session::new(config.fallback_message.clone()),
            input_state: TextInputState::new(),
            scroll_back: 0,
            transcript_max_scroll: Cell::new(0),
            notification: None,
            notification_ttl: 0,
            tick: 0,
            store,
            backend,
            history_timeout: config.history_timeout(),
            ask_timeout: config.ask_timeout(),
            export_dir,
            completion_tx,
            completion_rx,
        }
    }

    /// Resolve the identity and start loading its history.
    pub fn start(&mut self) {
        let resolved = identity::load_or_create(self.store.as_mut());
        let request = self.session.attach_identity(resolved.token);
        self.spawn_history(request);
    }

    /// Wait for the next finished backend task.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completion_rx.recv().await
    }

    fn spawn_history(&self, request: HistoryRequest) {
        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();
        let limit = self.history_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, backend.fetch_history(request.user_id.as_str())).await;
            // The receiver only goes away when the app quits.
            let _ = tx.send(Completion::History {
                ticket: request.ticket,
                result,
            });
        });
    }

    fn spawn_ask(&self, request: AskRequest) {
        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();
        let limit = self.ask_timeout;
        tokio::spawn(async move {
            let result = bounded(
                limit,
                backend.ask(&request.prompt, request.user_id.as_str()),
            )
            .await;
            let _ = tx.send(Completion::Reply {
                ticket: request.ticket,
                result,
            });
        });
    }

    /// Feed a finished backend task into the session.
    pub fn apply_completion(&mut self, completion: Completion) {
        match completion {
            Completion::History { ticket, result } => {
                if let HistoryOutcome::Loaded(count) = self.session.apply_history(ticket, result) {
                    debug!(count, "History shown");
                }
            }
            Completion::Reply { ticket, result } => {
                if let ReplyOutcome::Stale = self.session.apply_reply(ticket, result) {
                    debug!("Ignored reply from before the last reset");
                }
            }
        }
    }

    /// Reveal one more character of the pending reply.
    pub fn reveal_tick(&mut self) {
        if let RevealProgress::Step(_) = self.session.advance_reveal() {
            // The tick that shows the last character also completes the reveal.
            if self.session.reveal_finished() {
                self.session.advance_reveal();
            }
        }
    }

    /// Whether the reveal timer should be running.
    pub fn is_revealing(&self) -> bool {
        self.session.revealing().is_some()
    }

    /// Handle a key press.
    pub fn handle_key(&mut self, key: KeyEvent) {
        if self.confirm_reset {
            self.handle_confirm_action(confirm_key_to_action(key));
            return;
        }
        if self.show_help {
            // Any key closes help.
            self.show_help = false;
            return;
        }
        if self.handle_input_key(key) {
            return;
        }
        let action = key_to_action(key, self.input_state.is_empty());
        self.handle_action(action);
    }

    /// Handle a mouse event (wheel scrolls the transcript).
    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::ScrollUp => self.handle_action(Action::ScrollUp),
            MouseEventKind::ScrollDown => self.handle_action(Action::ScrollDown),
            _ => {}
        }
    }

    /// Insert pasted text into the prompt.
    pub fn handle_paste(&mut self, text: &str) {
        if self.show_help || self.confirm_reset || self.session.is_awaiting_reply() {
            return;
        }
        // Terminals send CR line endings in bracketed paste.
        self.input_state.insert_str(&text.replace("\r\n", "\n").replace('\r', "\n"));
    }

    /// Edit the prompt. Returns true if the key was consumed.
    fn handle_input_key(&mut self, key: KeyEvent) -> bool {
        if key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
        {
            return false;
        }
        // The input is locked while waiting for a reply.
        if self.session.is_awaiting_reply() {
            return false;
        }

        let input = &mut self.input_state;
        match key.code {
            KeyCode::Char('?') if input.is_empty() => false,
            KeyCode::Char(c) => {
                input.insert(c);
                true
            }
            KeyCode::Backspace => {
                input.backspace();
                true
            }
            KeyCode::Delete => {
                input.delete();
                true
            }
            KeyCode::Left => {
                input.move_left();
                true
            }
            KeyCode::Right => {
                input.move_right();
                true
            }
            KeyCode::Home => {
                input.move_home();
                true
            }
            KeyCode::End if !input.is_empty() => {
                input.move_end();
                true
            }
            KeyCode::Up if input.is_empty() || input.is_browsing_history() => {
                input.history_prev();
                true
            }
            KeyCode::Down if input.is_browsing_history() => {
                input.history_next();
                true
            }
            _ => false,
        }
    }

    /// Handle an action.
    pub fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::Help => self.show_help = !self.show_help,
            Action::Send => self.submit(),
            Action::Newline => {
                if !self.session.is_awaiting_reply() {
                    self.input_state.insert('\n');
                }
            }
            Action::Reset => self.confirm_reset = true,
            Action::Export => self.export_transcript(),
            Action::Back => self.show_help = false,
            Action::ScrollUp => self.scroll_up(1),
            Action::ScrollDown => self.scroll_back = self.scroll_back.saturating_sub(1),
            Action::PageUp => self.scroll_up(PAGE_ROWS),
            Action::PageDown => self.scroll_back = self.scroll_back.saturating_sub(PAGE_ROWS),
            Action::Follow => self.scroll_back = 0,
            Action::Confirm | Action::None => {}
        }
    }

    fn handle_confirm_action(&mut self, action: Action) {
        match action {
            Action::Confirm => self.reset_session(),
            Action::Back => self.confirm_reset = false,
            Action::Quit => self.should_quit = true,
            _ => {}
        }
    }

    fn scroll_up(&mut self, rows: usize) {
        self.scroll_back = (self.scroll_back + rows).min(self.transcript_max_scroll.get());
    }

    /// Send the typed prompt, if the session accepts it.
    fn submit(&mut self) {
        let text = self.input_state.content().to_string();
        if let Some(request) = self.session.begin_submit(&text) {
            self.input_state.submit();
            self.scroll_back = 0;
            self.spawn_ask(request);
        }
    }

    /// Clear the conversation, discard the identity and start over.
    pub fn reset_session(&mut self) {
        self.confirm_reset = false;
        self.session.reset();
        self.input_state.clear();
        self.scroll_back = 0;

        match identity::discard(self.store.as_mut()) {
            Ok(()) => {
                info!("Session reset by user");
                self.set_notification("Started a new conversation".to_string());
            }
            Err(e) => {
                warn!(error = %e, "Failed to discard stored identity");
                self.set_notification(format!("Could not clear stored identity: {e}"));
            }
        }
        self.start();
    }

    /// Write the conversation to a Markdown file.
    fn export_transcript(&mut self) {
        let Some(dir) = &self.export_dir else {
            self.set_notification("Export failed: no data directory".to_string());
            return;
        };

        let now = Utc::now();
        let user_id = self.session.user_id().map(|token| token.as_str());
        let content = render_markdown(self.session.messages(), user_id, now);
        let path = dir.join(export_file_name(now));
        match write_transcript(&path, &content) {
            Ok(()) => {
                info!(path = %path.display(), "Transcript exported");
                self.set_notification(format!("Exported to {}", path.display()));
            }
            Err(e) => {
                warn!(error = %e, "Transcript export failed");
                self.set_notification(format!("Export failed: {e}"));
            }
        }
    }

    fn set_notification(&mut self, msg: String) {
        self.notification = Some(msg);
        self.notification_ttl = NOTIFICATION_TICKS;
    }

    /// Advance time-based state.
    pub fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);

        if self.notification_ttl > 0 {
            self.notification_ttl -= 1;
            if self.notification_ttl == 0 {
                self.notification = None;
            }
        }
    }
}

#[cfg(test)]
impl App {
    /// App backed by a mock backend and an in-memory store.
    pub fn new_for_test(backend: Arc<parley_engine::testing::MockBackend>) -> Self {
        Self::new(
            &Config::default(),
            backend,
            Box::new(parley_engine::MemoryStore::new()),
            None,
        )
    }

    /// Type `text` into the input, one key at a time.
    pub fn type_text(&mut self, text: &str) {
        for ch in text.chars() {
            self.handle_key(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE));
        }
    }

    /// Wait for one backend completion and apply it.
    pub async fn settle_one(&mut self) {
        let completion = self.next_completion().await.expect("completion channel open");
        self.apply_completion(completion);
    }
}

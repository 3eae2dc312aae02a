//! Async driver that runs a [`Session`] against a backend and a store.
//!
//! The controller awaits each backend call inline and paces the reveal with
//! a tokio interval. Observers receive [`SessionEvent`]s over an unbounded
//! channel; they never touch the session themselves.

use crate::backend::{bounded, Backend};
use crate::config::Config;
use crate::identity::{self, KeyValueStore, ResolvedIdentity, StoreError};
use crate::message::Message;
use crate::session::{HistoryOutcome, ReplyOutcome, RevealProgress, Session};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Change notifications for read-only observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    IdentityResolved { created: bool },
    HistoryLoaded { count: usize },
    HistoryUnavailable,
    MessageAppended(Message),
    BusyChanged(bool),
    /// Visible prefix of the reply being revealed.
    RevealStep(String),
    Reset,
}

/// Runs the conversation against a [`Backend`] and a [`KeyValueStore`].
pub struct Controller<B, S> {
    session: Session,
    backend: B,
    store: S,
    history_timeout: Duration,
    ask_timeout: Duration,
    reveal_interval: Duration,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl<B: Backend, S: KeyValueStore> Controller<B, S> {
    pub fn new(config: &Config, backend: B, store: S) -> Self {
        Self {
            session: Session::new(config.fallback_message.clone()),
            backend,
            store,
            history_timeout: config.history_timeout(),
            ask_timeout: config.ask_timeout(),
            reveal_interval: config.reveal_interval(),
            events: None,
        }
    }

    /// Send [`SessionEvent`]s to `sink` from now on.
    #[must_use]
    pub fn with_event_sink(mut self, sink: UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the identity and load its history.
    ///
    /// History failures are absorbed: the log is left as it was.
    pub async fn initialize(&mut self) -> ResolvedIdentity {
        let resolved = identity::load_or_create(&mut self.store);
        self.emit(SessionEvent::IdentityResolved {
            created: resolved.created,
        });

        let request = self.session.attach_identity(resolved.token.clone());
        let result = bounded(
            self.history_timeout,
            self.backend.fetch_history(request.user_id.as_str()),
        )
        .await;

        match self.session.apply_history(request.ticket, result) {
            HistoryOutcome::Loaded(count) => self.emit(SessionEvent::HistoryLoaded { count }),
            HistoryOutcome::Failed => self.emit(SessionEvent::HistoryUnavailable),
            HistoryOutcome::Stale => {}
        }
        resolved
    }

    /// Send a prompt and wait until its reply is fully revealed.
    ///
    /// Returns `false` without doing anything when the prompt is blank or the
    /// session is busy.
    pub async fn submit_prompt(&mut self, text: &str) -> bool {
        let Some(request) = self.session.begin_submit(text) else {
            return false;
        };
        self.emit(SessionEvent::MessageAppended(Message::user(&request.prompt)));
        self.emit(SessionEvent::BusyChanged(true));

        let result = bounded(
            self.ask_timeout,
            self.backend
                .ask(&request.prompt, request.user_id.as_str()),
        )
        .await;

        match self.session.apply_reply(request.ticket, result) {
            ReplyOutcome::Revealing(steps) => {
                debug!(steps, "Revealing reply");
                self.run_reveal().await;
            }
            ReplyOutcome::Appended(message) | ReplyOutcome::Fallback(message) => {
                self.emit(SessionEvent::MessageAppended(message));
                self.emit(SessionEvent::BusyChanged(false));
            }
            ReplyOutcome::Stale => {}
        }
        true
    }

    /// Clear the conversation and discard the stored identity.
    ///
    /// The in-memory session is always reset; the error only reports that the
    /// stored token could not be removed.
    pub fn reset_session(&mut self) -> Result<(), StoreError> {
        self.session.reset();
        self.emit(SessionEvent::Reset);
        identity::discard(&mut self.store)?;
        info!("Session reset; a new identity will be created on next initialize");
        Ok(())
    }

    async fn run_reveal(&mut self) {
        let mut ticks = reveal_ticks(self.reveal_interval);
        loop {
            // The tick that shows the last character also completes the reveal.
            if !self.session.reveal_finished() {
                if let Some(ticks) = ticks.as_mut() {
                    ticks.tick().await;
                }
            }
            match self.session.advance_reveal() {
                RevealProgress::Step(visible) => self.emit(SessionEvent::RevealStep(visible)),
                RevealProgress::Completed(message) => {
                    self.emit(SessionEvent::MessageAppended(message));
                    self.emit(SessionEvent::BusyChanged(false));
                    break;
                }
                RevealProgress::Idle => break,
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(sink) = &self.events {
            // A dropped receiver just means nobody is watching.
            let _ = sink.send(event);
        }
    }
}

/// Interval whose first tick fires one period from now. `None` for a zero period.
fn reveal_ticks(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticks)
}

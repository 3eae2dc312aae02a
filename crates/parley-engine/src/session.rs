//! Conversation session state machine.
//!
//! [`Session`] owns the message log, the busy flag, the identity token and
//! the reveal of an incoming reply. It performs no I/O: callers issue the
//! backend requests a transition hands them and feed the results back in.
//! Front ends only read from it.
//!
//! Every request carries a [`Ticket`] stamped with the session epoch. A reset
//! bumps the epoch, so responses that arrive for a discarded session are
//! recognised and dropped.

use crate::backend::BackendError;
use crate::identity::IdentityToken;
use crate::message::Message;
use crate::reveal::Reveal;
use tracing::{debug, warn};

/// Correlates a backend response with the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    seq: u64,
}

/// A history fetch the caller must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub ticket: Ticket,
    pub user_id: IdentityToken,
}

/// An ask request the caller must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub ticket: Ticket,
    pub prompt: String,
    pub user_id: IdentityToken,
}

/// Result of feeding a history response into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// History was applied; holds the number of messages received.
    Loaded(usize),
    /// The fetch failed and the log was left untouched.
    Failed,
    /// The response belongs to a request this session no longer waits for.
    Stale,
}

/// Result of feeding an ask response into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply is being revealed; holds the number of reveal steps.
    Revealing(usize),
    /// The reply was empty and was appended without a reveal.
    Appended(Message),
    /// The request failed and the fallback message was appended.
    Fallback(Message),
    /// The response belongs to a request this session no longer waits for.
    Stale,
}

/// Result of one reveal tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealProgress {
    /// No reveal in progress.
    Idle,
    /// One more character is visible; holds the visible prefix.
    Step(String),
    /// The reveal finished and the reply was appended to the log.
    Completed(Message),
}

/// State of the initial history load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryState {
    /// No identity attached yet.
    #[default]
    NotRequested,
    /// A fetch is in flight.
    Loading,
    /// History was applied.
    Loaded,
    /// The fetch failed; the log stays as it was.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Awaiting(Ticket),
    Revealing(Reveal),
}

/// The conversation session.
#[derive(Debug, Clone)]
pub struct Session {
    log: Vec<Message>,
    phase: Phase,
    user_id: Option<IdentityToken>,
    history: HistoryState,
    history_ticket: Option<Ticket>,
    epoch: u64,
    next_seq: u64,
    fallback_message: String,
}

impl Session {
    /// Create an empty session. `fallback_message` is appended whenever an ask fails.
    pub fn new(fallback_message: impl Into<String>) -> Self {
        Self {
            log: Vec::new(),
            phase: Phase::Idle,
            user_id: None,
            history: HistoryState::NotRequested,
            history_ticket: None,
            epoch: 0,
            next_seq: 0,
            fallback_message: fallback_message.into(),
        }
    }

    // === Read-only view ===

    /// The conversation log, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    /// True while an ask is outstanding or a reply is being revealed.
    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// True while waiting for the backend to answer an ask.
    pub fn is_awaiting_reply(&self) -> bool {
        matches!(self.phase, Phase::Awaiting(_))
    }

    /// The partially revealed reply, if a reveal is in progress.
    pub fn revealing(&self) -> Option<&str> {
        match &self.phase {
            Phase::Revealing(reveal) => Some(reveal.visible()),
            _ => None,
        }
    }

    /// True when every character of the pending reply is visible and the next
    /// reveal tick will append it.
    pub fn reveal_finished(&self) -> bool {
        matches!(&self.phase, Phase::Revealing(reveal) if reveal.is_complete())
    }

    /// Identity attached to this session, if any.
    pub fn user_id(&self) -> Option<&IdentityToken> {
        self.user_id.as_ref()
    }

    pub fn history_state(&self) -> HistoryState {
        self.history
    }

    /// Number of resets this session has gone through.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    // === Transitions ===

    /// Attach the resolved identity and request its history.
    pub fn attach_identity(&mut self, user_id: IdentityToken) -> HistoryRequest {
        let ticket = self.issue_ticket();
        self.user_id = Some(user_id.clone());
        self.history = HistoryState::Loading;
        self.history_ticket = Some(ticket);
        debug!(epoch = self.epoch, "History requested");
        HistoryRequest { ticket, user_id }
    }

    /// Apply the outcome of a history fetch.
    ///
    /// History goes first; messages sent while the fetch was in flight are
    /// kept after it.
    pub fn apply_history(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<Message>, BackendError>,
    ) -> HistoryOutcome {
        if self.history_ticket != Some(ticket) {
            debug!("Dropping history response for a discarded request");
            return HistoryOutcome::Stale;
        }
        self.history_ticket = None;

        match result {
            Ok(history) => {
                let count = history.len();
                let local = std::mem::replace(&mut self.log, history);
                self.log.extend(local);
                self.history = HistoryState::Loaded;
                debug!(count, "History loaded");
                HistoryOutcome::Loaded(count)
            }
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Failed to load history");
                self.history = HistoryState::Unavailable;
                HistoryOutcome::Failed
            }
        }
    }

    /// Start a prompt submission.
    ///
    /// Returns `None` (and changes nothing) when the prompt is blank, the
    /// session is busy, or no identity is attached. Otherwise the user message
    /// is appended, the session becomes busy, and the returned request must be
    /// sent to the backend.
    pub fn begin_submit(&mut self, text: &str) -> Option<AskRequest> {
        if text.trim().is_empty() || self.is_busy() {
            return None;
        }
        let Some(user_id) = self.user_id.clone() else {
            debug!("Ignoring submit before identity is attached");
            return None;
        };

        self.log.push(Message::user(text));
        let ticket = self.issue_ticket();
        self.phase = Phase::Awaiting(ticket);
        debug!(epoch = self.epoch, "Ask requested");

        Some(AskRequest {
            ticket,
            prompt: text.to_string(),
            user_id,
        })
    }

    /// Apply the outcome of an ask request.
    pub fn apply_reply(
        &mut self,
        ticket: Ticket,
        result: Result<String, BackendError>,
    ) -> ReplyOutcome {
        if self.phase != Phase::Awaiting(ticket) {
            debug!("Dropping reply for a discarded request");
            return ReplyOutcome::Stale;
        }

        match result {
            Ok(reply) if reply.is_empty() => {
                let message = Message::assistant(reply);
                self.log.push(message.clone());
                self.phase = Phase::Idle;
                ReplyOutcome::Appended(message)
            }
            Ok(reply) => {
                let reveal = Reveal::new(reply);
                let steps = reveal.total_steps();
                self.phase = Phase::Revealing(reveal);
                ReplyOutcome::Revealing(steps)
            }
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Ask request failed");
                let message = Message::assistant(self.fallback_message.clone());
                self.log.push(message.clone());
                self.phase = Phase::Idle;
                ReplyOutcome::Fallback(message)
            }
        }
    }

    /// Reveal one more character of the pending reply.
    ///
    /// The tick after the last character appends the reply to the log and
    /// clears the busy flag.
    pub fn advance_reveal(&mut self) -> RevealProgress {
        let Phase::Revealing(reveal) = &mut self.phase else {
            return RevealProgress::Idle;
        };

        if reveal.advance() {
            return RevealProgress::Step(reveal.visible().to_string());
        }

        let Phase::Revealing(reveal) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return RevealProgress::Idle;
        };
        let message = Message::assistant(reveal.into_text());
        self.log.push(message.clone());
        RevealProgress::Completed(message)
    }

    /// Discard the conversation and identity.
    ///
    /// Any reveal is cancelled, the busy flag clears, and responses to
    /// requests issued before the reset are ignored from now on.
    pub fn reset(&mut self) {
        self.log.clear();
        self.phase = Phase::Idle;
        self.user_id = None;
        self.history = HistoryState::NotRequested;
        self.history_ticket = None;
        self.epoch += 1;
        debug!(epoch = self.epoch, "Session reset");
    }

    fn issue_ticket(&mut self) -> Ticket {
        self.next_seq += 1;
        Ticket {
            epoch: self.epoch,
            seq: self.next_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use std::time::Duration;

    const FALLBACK: &str = "⚠️ Sorry, something went wrong.";

    fn ready_session() -> Session {
        let mut session = Session::new(FALLBACK);
        let request = session.attach_identity(IdentityToken::from_stored("user-1"));
        session.apply_history(request.ticket, Ok(Vec::new()));
        session
    }

    fn drain_reveal(session: &mut Session) -> (Vec<String>, Option<Message>) {
        let mut steps = Vec::new();
        loop {
            match session.advance_reveal() {
                RevealProgress::Step(visible) => steps.push(visible),
                RevealProgress::Completed(message) => return (steps, Some(message)),
                RevealProgress::Idle => return (steps, None),
            }
        }
    }

    #[test]
    fn test_new_session_is_idle_and_empty() {
        let session = Session::new(FALLBACK);
        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
        assert!(session.user_id().is_none());
        assert_eq!(session.history_state(), HistoryState::NotRequested);
    }

    #[test]
    fn test_history_replaces_empty_log() {
        let mut session = Session::new(FALLBACK);
        let request = session.attach_identity(IdentityToken::from_stored("u"));
        assert_eq!(request.user_id.as_str(), "u");
        assert_eq!(session.history_state(), HistoryState::Loading);

        let outcome = session.apply_history(request.ticket, Ok(vec![Message::user("hi")]));
        assert_eq!(outcome, HistoryOutcome::Loaded(1));
        assert_eq!(session.messages(), &[Message::user("hi")]);
        assert_eq!(session.history_state(), HistoryState::Loaded);
    }

    #[test]
    fn test_history_failure_leaves_log_alone() {
        let mut session = Session::new(FALLBACK);
        let request = session.attach_identity(IdentityToken::from_stored("u"));

        let outcome = session.apply_history(
            request.ticket,
            Err(BackendError::Timeout(Duration::from_secs(10))),
        );
        assert_eq!(outcome, HistoryOutcome::Failed);
        assert!(session.messages().is_empty());
        assert_eq!(session.history_state(), HistoryState::Unavailable);
    }

    #[test]
    fn test_history_keeps_messages_sent_while_loading() {
        let mut session = Session::new(FALLBACK);
        let history = session.attach_identity(IdentityToken::from_stored("u"));
        let ask = session.begin_submit("early").unwrap();

        session.apply_history(
            history.ticket,
            Ok(vec![Message::user("old"), Message::assistant("older reply")]),
        );
        assert_eq!(
            session.messages(),
            &[
                Message::user("old"),
                Message::assistant("older reply"),
                Message::user("early"),
            ]
        );
        assert!(session.is_awaiting_reply());

        session.apply_reply(ask.ticket, Ok("ok".into()));
        drain_reveal(&mut session);
        assert_eq!(session.messages().last().unwrap(), &Message::assistant("ok"));
    }

    #[test]
    fn test_submit_appends_user_message_before_reply() {
        let mut session = ready_session();

        let request = session.begin_submit("hello").unwrap();
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.user_id.as_str(), "user-1");
        assert_eq!(session.messages(), &[Message::user("hello")]);
        assert!(session.is_busy());
        assert!(session.is_awaiting_reply());
    }

    #[test]
    fn test_submit_keeps_text_verbatim() {
        let mut session = ready_session();
        let request = session.begin_submit("  padded  ").unwrap();
        assert_eq!(request.prompt, "  padded  ");
        assert_eq!(session.messages()[0].content, "  padded  ");
    }

    #[test]
    fn test_blank_submit_is_noop() {
        let mut session = ready_session();
        assert!(session.begin_submit("").is_none());
        assert!(session.begin_submit("   \n\t").is_none());
        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
    }

    #[test]
    fn test_submit_while_busy_is_noop() {
        let mut session = ready_session();
        let first = session.begin_submit("one").unwrap();

        assert!(session.begin_submit("two").is_none());
        assert_eq!(session.messages().len(), 1);
        assert!(session.is_busy());

        // Still rejected while the reply is being revealed.
        session.apply_reply(first.ticket, Ok("abc".into()));
        session.advance_reveal();
        assert!(session.begin_submit("three").is_none());
        assert_eq!(session.messages().len(), 1);
        assert!(session.is_busy());
    }

    #[test]
    fn test_submit_without_identity_is_noop() {
        let mut session = Session::new(FALLBACK);
        assert!(session.begin_submit("hello").is_none());
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_successful_reply_reveals_then_appends() {
        let mut session = ready_session();
        let request = session.begin_submit("hello").unwrap();

        let outcome = session.apply_reply(request.ticket, Ok("hi there".into()));
        assert_eq!(outcome, ReplyOutcome::Revealing(8));
        assert!(session.is_busy());
        assert_eq!(session.revealing(), Some(""));
        // Not in the log until the reveal completes.
        assert_eq!(session.messages().len(), 1);

        let (steps, completed) = drain_reveal(&mut session);
        assert_eq!(
            steps,
            vec!["h", "hi", "hi ", "hi t", "hi th", "hi the", "hi ther", "hi there"]
        );
        assert_eq!(completed, Some(Message::assistant("hi there")));
        assert_eq!(
            session.messages(),
            &[Message::user("hello"), Message::assistant("hi there")]
        );
        assert!(!session.is_busy());
        assert!(session.revealing().is_none());
        assert_eq!(session.advance_reveal(), RevealProgress::Idle);
    }

    #[test]
    fn test_reveal_steps_are_strictly_growing_prefixes() {
        let mut session = ready_session();
        let reply = "The quick brown fox";
        let request = session.begin_submit("q").unwrap();
        session.apply_reply(request.ticket, Ok(reply.into()));

        let (steps, _) = drain_reveal(&mut session);
        assert_eq!(steps.len(), reply.chars().count());
        for window in steps.windows(2) {
            assert!(window[1].starts_with(&window[0]));
            assert!(window[1].len() > window[0].len());
        }
        for step in &steps {
            assert!(reply.starts_with(step.as_str()));
        }
    }

    #[test]
    fn test_failed_reply_appends_fallback() {
        let failures = vec![
            BackendError::Timeout(Duration::from_secs(30)),
            BackendError::Network("connection refused".into()),
            BackendError::Status(502),
            BackendError::Malformed("missing field `reply`".into()),
        ];

        for error in failures {
            let mut session = ready_session();
            let request = session.begin_submit("x").unwrap();

            let outcome = session.apply_reply(request.ticket, Err(error));
            assert_eq!(outcome, ReplyOutcome::Fallback(Message::assistant(FALLBACK)));
            assert_eq!(
                session.messages(),
                &[Message::user("x"), Message::assistant(FALLBACK)]
            );
            assert!(!session.is_busy());
        }
    }

    #[test]
    fn test_empty_reply_appends_without_reveal() {
        let mut session = ready_session();
        let request = session.begin_submit("hello").unwrap();

        let outcome = session.apply_reply(request.ticket, Ok(String::new()));
        assert_eq!(outcome, ReplyOutcome::Appended(Message::assistant("")));
        assert!(!session.is_busy());
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].role, Role::Assistant);
        assert_eq!(session.advance_reveal(), RevealProgress::Idle);
    }

    #[test]
    fn test_can_submit_again_after_reply() {
        let mut session = ready_session();
        let first = session.begin_submit("one").unwrap();
        session.apply_reply(first.ticket, Ok("1".into()));
        drain_reveal(&mut session);

        let second = session.begin_submit("two").unwrap();
        session.apply_reply(second.ticket, Err(BackendError::Status(500)));
        assert_eq!(session.messages().len(), 4);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = ready_session();
        let request = session.begin_submit("hello").unwrap();
        session.apply_reply(request.ticket, Ok("a long reply".into()));
        session.advance_reveal();

        session.reset();
        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
        assert!(session.revealing().is_none());
        assert!(session.user_id().is_none());
        assert_eq!(session.epoch(), 1);
        assert_eq!(session.advance_reveal(), RevealProgress::Idle);
    }

    #[test]
    fn test_reply_after_reset_is_dropped() {
        let mut session = ready_session();
        let request = session.begin_submit("hello").unwrap();

        session.reset();
        let history = session.attach_identity(IdentityToken::from_stored("user-2"));
        session.apply_history(history.ticket, Ok(Vec::new()));

        let outcome = session.apply_reply(request.ticket, Ok("late".into()));
        assert_eq!(outcome, ReplyOutcome::Stale);
        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
    }

    #[test]
    fn test_late_reply_does_not_hijack_new_request() {
        let mut session = ready_session();
        let old = session.begin_submit("before reset").unwrap();
        session.reset();
        session.attach_identity(IdentityToken::from_stored("user-2"));
        let new = session.begin_submit("after reset").unwrap();

        assert_eq!(session.apply_reply(old.ticket, Ok("late".into())), ReplyOutcome::Stale);
        assert!(session.is_awaiting_reply());

        assert_eq!(
            session.apply_reply(new.ticket, Ok("fresh".into())),
            ReplyOutcome::Revealing(5)
        );
    }

    #[test]
    fn test_history_after_reset_is_dropped() {
        let mut session = Session::new(FALLBACK);
        let request = session.attach_identity(IdentityToken::from_stored("u"));
        session.reset();

        let outcome = session.apply_history(request.ticket, Ok(vec![Message::user("old")]));
        assert_eq!(outcome, HistoryOutcome::Stale);
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_duplicate_reply_is_stale() {
        let mut session = ready_session();
        let request = session.begin_submit("hello").unwrap();
        session.apply_reply(request.ticket, Err(BackendError::Status(500)));

        assert_eq!(
            session.apply_reply(request.ticket, Ok("again".into())),
            ReplyOutcome::Stale
        );
        assert_eq!(session.messages().len(), 2);
    }
}

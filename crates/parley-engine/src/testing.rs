//! Scriptable backend for tests.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream crates.

use crate::backend::{Backend, BackendError};
use crate::message::Message;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A call the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    History { user_id: String },
    Ask { prompt: String, user_id: String },
}

#[derive(Debug)]
enum Script<T> {
    Respond(Result<T, BackendError>),
    After(Duration, Result<T, BackendError>),
    Hang,
}

impl<T> Script<T> {
    async fn play(self) -> Result<T, BackendError> {
        match self {
            Self::Respond(result) => result,
            Self::After(delay, result) => {
                tokio::time::sleep(delay).await;
                result
            }
            Self::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    history: VecDeque<Script<Vec<Message>>>,
    asks: VecDeque<Script<String>>,
    calls: Vec<RecordedCall>,
}

/// Backend double with queued responses.
///
/// Unscripted history calls return an empty history; unscripted asks fail
/// with a malformed-response error.
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: Mutex<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue the result of the next history fetch.
    pub fn push_history(&self, result: Result<Vec<Message>, BackendError>) -> &Self {
        self.lock().history.push_back(Script::Respond(result));
        self
    }

    /// Queue a history fetch that never answers.
    pub fn push_history_hang(&self) -> &Self {
        self.lock().history.push_back(Script::Hang);
        self
    }

    /// Queue the result of the next ask.
    pub fn push_reply(&self, result: Result<String, BackendError>) -> &Self {
        self.lock().asks.push_back(Script::Respond(result));
        self
    }

    /// Queue an ask result delivered after `delay`.
    pub fn push_reply_after(&self, delay: Duration, result: Result<String, BackendError>) -> &Self {
        self.lock().asks.push_back(Script::After(delay, result));
        self
    }

    /// Queue an ask that never answers.
    pub fn push_reply_hang(&self) -> &Self {
        self.lock().asks.push_back(Script::Hang);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Prompts sent through `ask`, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Ask { prompt, .. } => Some(prompt),
                RecordedCall::History { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>, BackendError> {
        let script = {
            let mut inner = self.lock();
            inner.calls.push(RecordedCall::History {
                user_id: user_id.to_string(),
            });
            inner.history.pop_front()
        };
        match script {
            Some(script) => script.play().await,
            None => Ok(Vec::new()),
        }
    }

    async fn ask(&self, prompt: &str, user_id: &str) -> Result<String, BackendError> {
        let script = {
            let mut inner = self.lock();
            inner.calls.push(RecordedCall::Ask {
                prompt: prompt.to_string(),
                user_id: user_id.to_string(),
            });
            inner.asks.pop_front()
        };
        match script {
            Some(script) => script.play().await,
            None => Err(BackendError::Malformed("no scripted reply".into())),
        }
    }
}

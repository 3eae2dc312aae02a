//! parley-engine: Headless session engine for the parley chat client
//!
//! This crate holds everything that does not draw to a terminal:
//! - The conversation session state machine and its reveal iterator
//! - The HTTP backend client for the history and ask endpoints
//! - The identity token and its key-value store
//! - Configuration and transcript export
//! - An async controller that drives a session end to end

pub mod backend;
pub mod config;
pub mod controller;
pub mod identity;
pub mod message;
pub mod reveal;
pub mod session;
pub mod transcript;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export commonly used types
pub use backend::{bounded, Backend, BackendError, FailureKind, HttpBackend};
pub use config::{data_dir, Config, ConfigError, API_URL_ENV};
pub use controller::{Controller, SessionEvent};
pub use identity::{
    discard, load_or_create, FileStore, IdentityToken, KeyValueStore, MemoryStore,
    ResolvedIdentity, StoreError, USER_ID_KEY,
};
pub use message::{Message, Role};
pub use reveal::{Reveal, TYPING_CURSOR};
pub use session::{
    AskRequest, HistoryOutcome, HistoryRequest, HistoryState, ReplyOutcome, RevealProgress,
    Session, Ticket,
};

/// Returns the engine version.
pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

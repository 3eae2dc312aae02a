//! Reusable widgets for the parley TUI.

pub mod status_bar;
pub mod text_input;
pub mod transcript;

pub use status_bar::{KeyHint, StatusBar};
pub use text_input::TextInputState;
pub use transcript::Transcript;

//! UI building blocks for the parley TUI.

pub mod layout;
pub mod theme;
pub mod widgets;

pub use layout::*;

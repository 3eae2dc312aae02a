//! Incremental (typewriter) reveal of an assistant reply.
//!
//! A [`Reveal`] is a finite, lazily stepped sequence of prefixes of the reply:
//! for a reply of N characters it yields prefixes of length 1..=N and then
//! stops. It holds no timer; callers pace it (a tokio interval in the TUI and
//! controller, or nothing at all in tests).

/// Cursor shown after the partially revealed text.
pub const TYPING_CURSOR: char = '▋';

/// Progressive disclosure of a reply, one character per step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    text: String,
    /// Byte offset of the end of the visible prefix.
    shown: usize,
}

impl Reveal {
    /// Start revealing `text`. Nothing is visible until the first step.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            shown: 0,
        }
    }

    /// Reveal one more character. Returns `false` once everything is shown.
    pub fn advance(&mut self) -> bool {
        match self.text[self.shown..].chars().next() {
            Some(ch) => {
                self.shown += ch.len_utf8();
                true
            }
            None => false,
        }
    }

    /// Currently visible prefix.
    pub fn visible(&self) -> &str {
        &self.text[..self.shown]
    }

    /// Whether every character has been revealed.
    pub fn is_complete(&self) -> bool {
        self.shown == self.text.len()
    }

    /// Total number of steps this reveal takes (character count).
    pub fn total_steps(&self) -> usize {
        self.text.chars().count()
    }

    /// The full reply.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the reveal, returning the full reply.
    pub fn into_text(self) -> String {
        self.text
    }
}

impl Iterator for Reveal {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.advance() {
            Some(self.visible().to_string())
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.text[self.shown..].chars().count();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Reveal {}

impl std::iter::FusedIterator for Reveal {}

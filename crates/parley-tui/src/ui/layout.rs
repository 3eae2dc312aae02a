//! Layout helpers for the parley TUI.

use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Height of the input box, borders included.
pub const INPUT_HEIGHT: u16 = 5;

/// Create a centered rect with fixed dimensions.
pub fn centered_fixed(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

/// Split the screen into transcript, input box and status bar.
pub fn chat_layout(area: Rect) -> (Rect, Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(INPUT_HEIGHT),
            Constraint::Length(1),
        ])
        .split(area);
    (chunks[0], chunks[1], chunks[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_fixed_clamps_to_area() {
        let area = Rect::new(0, 0, 20, 10);
        assert_eq!(centered_fixed(10, 4, area), Rect::new(5, 3, 10, 4));
        assert_eq!(centered_fixed(40, 40, area), Rect::new(0, 0, 20, 10));
    }

    #[test]
    fn test_chat_layout_reserves_input_and_status() {
        let (transcript, input, status) = chat_layout(Rect::new(0, 0, 80, 24));
        assert_eq!(status.height, 1);
        assert_eq!(status.y, 23);
        assert_eq!(input.height, INPUT_HEIGHT);
        assert_eq!(transcript.height, 24 - 1 - INPUT_HEIGHT);
    }
}

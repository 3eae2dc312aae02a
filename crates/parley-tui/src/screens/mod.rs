//! Screens and overlays for the parley TUI.

pub mod chat;

use crate::app::App;
use crate::ui::centered_fixed;
use crate::ui::theme::Styles;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Widget},
};

/// Trait for screens that can be rendered.
pub trait Screen {
    fn render(&self, app: &App, area: Rect, buf: &mut Buffer);
}

/// Render the key binding overlay.
pub fn render_help_overlay(area: Rect, buf: &mut Buffer) {
    let help_text = r"
  Enter              Send message
  Shift/Ctrl+Enter   New line
  Up / Down          Previous prompts / scroll
  PgUp / PgDn        Scroll conversation
  End                Follow newest message
  Ctrl+E             Export transcript
  Ctrl+R             New conversation
  Ctrl+C             Quit
  F1 or ?            Toggle this help

  [Press any key to close]
";

    let width = 50.min(area.width.saturating_sub(4));
    let height = 15.min(area.height.saturating_sub(2));
    let overlay_area = centered_fixed(width, height, area);

    Clear.render(overlay_area, buf);

    let block = Block::default()
        .title(" Help ")
        .title_style(Styles::title())
        .borders(Borders::ALL)
        .border_style(Styles::border_active())
        .style(Styles::default());

    Paragraph::new(help_text)
        .block(block)
        .style(Styles::default())
        .render(overlay_area, buf);
}

/// Render the "start a new conversation?" dialog.
pub fn render_reset_confirm(area: Rect, buf: &mut Buffer) {
    let width = 46.min(area.width.saturating_sub(4));
    let height = 7.min(area.height);
    let dialog_area = centered_fixed(width, height, area);

    Clear.render(dialog_area, buf);

    let block = Block::default()
        .title(" New conversation ")
        .title_style(Styles::title())
        .borders(Borders::ALL)
        .border_style(Styles::border_active())
        .style(Styles::default());

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            " Clear this conversation and identity?",
            Styles::warning(),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled(" y ", Styles::key_hint()),
            Span::styled(" Yes   ", Styles::default()),
            Span::styled(" n ", Styles::key_hint()),
            Span::styled(" No", Styles::default()),
        ]),
    ];

    Paragraph::new(lines)
        .block(block)
        .style(Styles::default())
        .render(dialog_area, buf);
}

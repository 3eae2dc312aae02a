//! Conversation transcript pane.
//!
//! Messages are pre-wrapped with `textwrap` so the widget knows how many
//! rows the conversation occupies and can anchor the view to the bottom.

use crate::ui::theme::Styles;
use parley_engine::{Message, Role, TYPING_CURSOR};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

/// Indentation of message bodies under their role label.
const BODY_INDENT: &str = "  ";

/// Scrollable view of the conversation log plus the reply being revealed.
pub struct Transcript<'a> {
    messages: &'a [Message],
    revealing: Option<&'a str>,
    /// Rows scrolled back from the newest content; 0 follows the bottom.
    scroll_back: usize,
    empty_hint: &'a str,
}

impl<'a> Transcript<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self {
            messages,
            revealing: None,
            scroll_back: 0,
            empty_hint: "",
        }
    }

    /// Partially revealed reply, drawn after the log with a typing cursor.
    #[must_use]
    pub fn revealing(mut self, visible: Option<&'a str>) -> Self {
        self.revealing = visible;
        self
    }

    #[must_use]
    pub fn scroll_back(mut self, rows: usize) -> Self {
        self.scroll_back = rows;
        self
    }

    /// Text shown when there is nothing to display.
    #[must_use]
    pub fn empty_hint(mut self, hint: &'a str) -> Self {
        self.empty_hint = hint;
        self
    }

    /// Wrapped rows for a pane `width` columns wide.
    pub fn lines(&self, width: usize) -> Vec<Line<'static>> {
        let body_width = width.saturating_sub(BODY_INDENT.len()).max(1);
        let mut lines = Vec::new();

        for msg in self.messages {
            push_message(&mut lines, msg.role, &msg.content, body_width, None);
        }
        if let Some(visible) = self.revealing {
            push_message(
                &mut lines,
                Role::Assistant,
                visible,
                body_width,
                Some(TYPING_CURSOR),
            );
        }
        // No trailing separator after the last message.
        if lines.last().is_some_and(|line| line.spans.is_empty()) {
            lines.pop();
        }
        lines
    }

    /// Largest useful scroll offset for a pane of the given size.
    pub fn max_scroll(&self, width: usize, height: usize) -> usize {
        self.lines(width).len().saturating_sub(height)
    }
}

fn push_message(
    lines: &mut Vec<Line<'static>>,
    role: Role,
    content: &str,
    width: usize,
    cursor: Option<char>,
) {
    let label_style = match role {
        Role::User => Styles::user_label(),
        Role::Assistant => Styles::assistant_label(),
    };
    lines.push(Line::from(Span::styled(role.label(), label_style)));

    let mut body: Vec<String> = content
        .split('\n')
        .flat_map(|paragraph| {
            textwrap::wrap(paragraph, width)
                .into_iter()
                .map(std::borrow::Cow::into_owned)
                .collect::<Vec<_>>()
        })
        .collect();
    if let Some(cursor) = cursor {
        match body.last_mut() {
            Some(last) => last.push(cursor),
            None => body.push(cursor.to_string()),
        }
    }

    for row in body {
        lines.push(Line::from(vec![
            Span::raw(BODY_INDENT),
            Span::styled(row, Styles::default()),
        ]));
    }
    lines.push(Line::default());
}

impl Widget for Transcript<'_> {
    #[allow(clippy::cast_possible_truncation)]
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(" Conversation ")
            .title_style(Styles::title())
            .borders(Borders::ALL)
            .border_style(Styles::border())
            .style(Styles::default());
        let inner = block.inner(area);
        block.render(area, buf);

        if inner.width == 0 || inner.height == 0 {
            return;
        }

        let lines = self.lines(inner.width as usize);
        if lines.is_empty() {
            Paragraph::new(Line::from(Span::styled(self.empty_hint, Styles::dim())))
                .style(Style::default())
                .render(inner, buf);
            return;
        }

        let max_scroll = lines.len().saturating_sub(inner.height as usize);
        let offset = max_scroll - self.scroll_back.min(max_scroll);
        Paragraph::new(lines)
            .scroll((offset as u16, 0))
            .render(inner, buf);
    }
}

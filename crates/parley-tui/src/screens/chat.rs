//! Chat screen: transcript, prompt input and status bar.

use crate::app::App;
use crate::screens::Screen;
use crate::ui::theme::{spinner_frame, Styles};
use crate::ui::widgets::{KeyHint, StatusBar, Transcript};
use crate::ui::chat_layout;
use parley_engine::HistoryState;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

/// The chat screen.
pub struct ChatScreen;

impl Screen for ChatScreen {
    #[allow(clippy::cast_possible_truncation)]
    fn render(&self, app: &App, area: Rect, buf: &mut Buffer) {
        let (transcript_area, input_area, status_area) = chat_layout(area);

        let hint = match app.session.history_state() {
            HistoryState::Loading => "Loading conversation...",
            _ => "Say hello to start the conversation.",
        };
        let transcript = Transcript::new(app.session.messages())
            .revealing(app.session.revealing())
            .scroll_back(app.scroll_back)
            .empty_hint(hint);

        let inner = Block::default().borders(Borders::ALL).inner(transcript_area);
        app.transcript_max_scroll
            .set(transcript.max_scroll(inner.width as usize, inner.height as usize));
        transcript.render(transcript_area, buf);

        render_input(app, input_area, buf);
        render_status(app, status_area, buf);
    }
}

fn render_input(app: &App, area: Rect, buf: &mut Buffer) {
    let awaiting = app.session.is_awaiting_reply();
    let block = Block::default()
        .title(" Message ")
        .title_style(Styles::title())
        .borders(Borders::ALL)
        .border_style(if awaiting {
            Styles::border()
        } else {
            Styles::border_active()
        })
        .style(Styles::default());

    if awaiting {
        let inner = block.inner(area);
        block.render(area, buf);
        let line = Line::from(vec![
            Span::styled("> ", Styles::dim()),
            Span::styled(
                format!("Thinking... {}", spinner_frame(app.tick)),
                Styles::dim(),
            ),
        ]);
        Paragraph::new(line).render(inner, buf);
        return;
    }

    app.input_state
        .widget()
        .block(block)
        .focused(!app.show_help && !app.confirm_reset)
        .placeholder("Type a message")
        .render(area, buf);
}

fn render_status(app: &App, area: Rect, buf: &mut Buffer) {
    let hints = vec![
        KeyHint::new("Enter", "Send"),
        KeyHint::new("Ctrl+E", "Export"),
        KeyHint::new("Ctrl+R", "New"),
        KeyHint::new("F1", "Help"),
    ];
    let follow_hint;
    let mut status_bar = StatusBar::new("Chat").hints(hints);
    if let Some(notification) = &app.notification {
        status_bar = status_bar.right_warning(notification);
    } else if app.scroll_back > 0 {
        follow_hint = format!("{} rows up (End to follow)", app.scroll_back);
        status_bar = status_bar.right(&follow_hint);
    }
    status_bar.render(area, buf);
}

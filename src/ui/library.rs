//! Recording library panel.
//!
//! Lists saved recordings with selection, and hosts the inline rename
//! dialog.

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Paragraph};
use ratatui::Frame;

use crate::app::App;
use crate::ui::centered_rect;

/// Formats a millisecond duration as m:ss.
fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Renders the recording library panel.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `area` - The area to render in
/// * `app` - Application state
/// * `focused` - Whether this panel is focused
pub fn render_library(frame: &mut Frame, area: Rect, app: &App, focused: bool) {
    let block = Block::default()
        .title(format!(" Recordings ({}) ", app.recordings.len()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::Gray }));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if app.recordings.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "No recordings yet. Press R to record.",
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ))),
            inner,
        );
        return;
    }

    let items: Vec<ListItem> = app
        .recordings
        .iter()
        .enumerate()
        .map(|(index, recording)| {
            let selected = index == app.selected_recording;
            let marker = if selected { "> " } else { "  " };
            let name_style = if selected {
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(Color::Cyan)),
                Span::styled(recording.name.clone(), name_style),
                Span::styled(
                    format!(
                        "  {} notes, {}",
                        recording.note_count(),
                        format_duration(recording.duration_ms())
                    ),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    frame.render_widget(List::new(items), inner);
}

/// Renders the rename dialog over the rest of the UI, when open.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `app` - Application state
pub fn render_rename_dialog(frame: &mut Frame, app: &App) {
    let Some(rename) = &app.rename_dialog else {
        return;
    };

    let area = centered_rect(40, 20, frame.area());
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Rename recording ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let lines = vec![
        Line::from(vec![
            Span::styled("Name: ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("{}_", rename.input),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(Span::styled(
            "[Enter] Confirm  [Esc] Cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    frame.render_widget(Paragraph::new(lines), inner);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(1000), "0:01");
        assert_eq!(format_duration(61_500), "1:01");
        assert_eq!(format_duration(600_000), "10:00");
    }
}

//! Transport/status bar.
//!
//! Shows the session state (IDLE / RECORDING / PLAYING), the logical clock,
//! the active device, and transient status messages.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::app::App;

/// Formats a millisecond clock reading as m:ss.t (tenths).
fn format_clock(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}.{}", secs / 60, secs % 60, (ms % 1000) / 100)
}

/// Renders the transport bar at the top of the screen.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `area` - The area to render in
/// * `app` - Application state
pub fn render_status_bar(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .title(" keyfall ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(16), // Session state
            Constraint::Length(14), // Clock
            Constraint::Length(30), // Active device
            Constraint::Min(20),    // Status message / key hints
        ])
        .split(inner);

    // Session state
    let state = if app.session.is_recording() {
        Span::styled(
            " [o] REC ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else if app.playback.is_playing() {
        Span::styled(
            " [>] PLAY ",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            " [.] IDLE ",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::BOLD),
        )
    };
    frame.render_widget(Paragraph::new(Line::from(state)), chunks[0]);

    // Logical clock: recording-elapsed or playback position
    let clock_ms = if app.session.is_recording() {
        app.session.elapsed_ms(app.clock.now_ms())
    } else {
        app.playback.current_time_ms()
    };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("t ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                format_clock(clock_ms),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            ),
        ])),
        chunks[1],
    );

    // Active device, with a pedal indicator while the sustain is down
    let device = app
        .usb
        .connected_device_name()
        .or_else(|| app.ble.connected_device_name())
        .unwrap_or("no device");
    let pedal = if app.session.sustain_down() { " [ped]" } else { "" };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("in: ", Style::default().fg(Color::DarkGray)),
            Span::styled(device.to_string(), Style::default().fg(Color::White)),
            Span::styled(pedal, Style::default().fg(Color::Yellow)),
        ])),
        chunks[2],
    );

    // Status message or key hints
    let line = if let Some((message, _)) = &app.status_message {
        Line::from(Span::styled(
            message.clone(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::ITALIC),
        ))
    } else {
        Line::from(Span::styled(
            "[R] record  [Space] play  [F2] rename  [U] usb  [B] ble  notes: Z/Q rows",
            Style::default().fg(Color::DarkGray),
        ))
    };
    frame.render_widget(Paragraph::new(line), chunks[3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "0:00.0");
        assert_eq!(format_clock(1234), "0:01.2");
        assert_eq!(format_clock(65_900), "1:05.9");
    }
}

//! Device panel.
//!
//! Lists discovered and connected MIDI devices for both transports with
//! their lifecycle state.

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::Frame;

use crate::app::App;
use crate::transport::{ConnectionState, DeviceHandle, MidiTransport};

/// One list row for a device.
fn device_item(device: &DeviceHandle) -> ListItem<'static> {
    let (state_str, state_color) = match device.connection_state {
        ConnectionState::Scanning => ("scanning", Color::Yellow),
        ConnectionState::Connected => ("connected", Color::Green),
        ConnectionState::Disconnected => ("disconnected", Color::DarkGray),
    };
    ListItem::new(Line::from(vec![
        Span::styled(
            format!("[{}] ", device.transport),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(device.display_name.clone(), Style::default().fg(Color::White)),
        Span::styled(
            format!("  {}", state_str),
            Style::default().fg(state_color),
        ),
    ]))
}

/// Renders the device panel.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `area` - The area to render in
/// * `app` - Application state
/// * `focused` - Whether this panel is focused
pub fn render_devices(frame: &mut Frame, area: Rect, app: &App, focused: bool) {
    let title = if app.ble.is_scanning() {
        " Devices [scanning...] "
    } else {
        " Devices "
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::Gray }));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let mut items: Vec<ListItem> = Vec::new();
    if !app.usb.is_available() {
        items.push(ListItem::new(Line::from(Span::styled(
            "USB MIDI unavailable",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ))));
    }
    if !app.ble.is_available() {
        items.push(ListItem::new(Line::from(Span::styled(
            "BLE MIDI unavailable",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ))));
    }
    for device in app.usb.devices().iter().chain(app.ble.devices().iter()) {
        items.push(device_item(device));
    }

    if items.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "No devices. [u] refresh USB, [b] scan BLE",
                Style::default().fg(Color::DarkGray),
            ))),
            inner,
        );
        return;
    }

    frame.render_widget(List::new(items), inner);
}

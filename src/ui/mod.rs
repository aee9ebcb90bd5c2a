//! Terminal user interface components.
//!
//! This module provides the visual components of the recorder: the
//! transport/status bar, the falling-notes timeline, the recording library,
//! the device panel, and the interactive piano keyboard.

mod devices;
mod library;
mod status;

pub mod falling_notes;
pub mod keyboard;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::Frame;

use crate::app::{App, FocusedPanel, LayoutRegions};

pub use devices::render_devices;
pub use falling_notes::{layout_notes, render_falling_notes, NoteRect, TimelineMode, Viewport};
pub use keyboard::{hit_test as keyboard_hit_test, render_keyboard, KEYBOARD_HEIGHT};
pub use library::{render_library, render_rename_dialog};
pub use status::render_status_bar;

/// Calculates the layout regions for the given terminal size.
fn calculate_layout(size: Rect) -> (LayoutRegions, [Rect; 3], [Rect; 2]) {
    // Main vertical layout: status bar, content, keyboard
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                // Status/transport bar
            Constraint::Min(10),                  // Content area
            Constraint::Length(KEYBOARD_HEIGHT),  // Keyboard
        ])
        .split(size);

    // Content area: side panels on the left, falling notes on the right
    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(34), // Library + devices
            Constraint::Min(40),    // Falling notes
        ])
        .split(main_chunks[1]);

    let layout = LayoutRegions {
        status_bar: main_chunks[0],
        side_panel: content_chunks[0],
        timeline: content_chunks[1],
        keyboard: main_chunks[2],
        // Set during rendering, after borders are known.
        keyboard_keys: Rect::default(),
    };

    let main_arr = [main_chunks[0], main_chunks[1], main_chunks[2]];
    let content_arr = [content_chunks[0], content_chunks[1]];
    (layout, main_arr, content_arr)
}

/// Renders the complete UI and updates layout regions for hit testing.
///
/// The layout is divided into:
/// - Top: transport bar with session state and the logical clock
/// - Left: recording library above the device panel
/// - Center: falling-notes timeline
/// - Bottom: interactive piano keyboard
pub fn render(frame: &mut Frame, app: &mut App) {
    let size = frame.area();
    let (mut layout, main_chunks, content_chunks) = calculate_layout(size);

    render_status_bar(frame, main_chunks[0], app);

    // Side panels: library on top, devices below.
    let side_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(8)])
        .split(content_chunks[0]);
    render_library(
        frame,
        side_chunks[0],
        app,
        app.focused_panel == FocusedPanel::Library,
    );
    render_devices(
        frame,
        side_chunks[1],
        app,
        app.focused_panel == FocusedPanel::Devices,
    );

    // The timeline view: mode and inputs depend on session state.
    let now_ms = app.clock.now_ms();
    let (mode, clock_ms) = if app.session.is_recording() {
        (TimelineMode::Recording, app.session.elapsed_ms(now_ms))
    } else if app.playback.is_playing() {
        (TimelineMode::Playback, app.playback.current_time_ms())
    } else {
        (TimelineMode::Static, 0)
    };
    // The session clock is absolute; the layout wants onsets relative to
    // the recording start.
    let active_relative: Vec<_> = app
        .session
        .active_notes()
        .iter()
        .map(|(&note, &state)| {
            (
                note,
                crate::session::ActiveNote {
                    onset_ms: state.onset_ms.saturating_sub(app.session.start_ms()),
                    velocity: state.velocity,
                },
            )
        })
        .collect();
    let notes: Vec<_> = if app.playback.is_playing() {
        app.playback.notes().to_vec()
    } else if app.session.is_recording() || !app.session.notes().is_empty() {
        app.session.notes().to_vec()
    } else {
        // Nothing live: show the selected library take, motionless.
        app.recordings
            .get(app.selected_recording)
            .map(|r| r.notes.clone())
            .unwrap_or_default()
    };
    render_falling_notes(
        frame,
        content_chunks[1],
        &notes,
        &active_relative,
        clock_ms,
        mode,
    );

    // Keyboard with the merged pressed set.
    let pressed = app.merged_pressed_keys();
    layout.keyboard_keys = render_keyboard(
        frame,
        main_chunks[2],
        &pressed,
        app.focused_panel == FocusedPanel::Keyboard,
    );

    app.update_layout(layout);

    // Dialogs render above everything.
    render_rename_dialog(frame, app);
}

/// Helper function to center a rectangle within another rectangle.
pub fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

//! Interactive 88-key piano keyboard.
//!
//! Renders the full piano at the bottom of the screen — 52 white keys with
//! the 36 black keys layered above them — and hit-tests mouse presses back
//! to MIDI notes. Horizontal placement uses [`crate::midi::keys`], the same
//! lookup as the falling-notes view, so the visual columns land exactly on
//! their keys.
//!
//! Pressed highlighting merges every input source: touch, USB, and BLE keys
//! all light up the same way.

use std::collections::HashSet;

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;

use crate::midi::keys::{black_key_at, key_x_position, white_key_at, BLACK_KEY_WIDTH_RATIO};
use crate::midi::{is_black_key, PIANO_HIGH, PIANO_LOW, WHITE_KEY_COUNT};

/// Rows of the inner area (from the top) that belong to the black-key layer.
const BLACK_LAYER_ROWS: u16 = 2;

/// Total outer height the keyboard panel wants.
pub const KEYBOARD_HEIGHT: u16 = 6;

/// Maps a click inside the keyboard area to a MIDI note.
///
/// The black layer gets first refusal: clicks in the upper rows that land on
/// a black key's span resolve to that key, everything else falls through to
/// the white key under the column.
///
/// # Arguments
///
/// * `area` - The keyboard panel's inner area (as rendered)
/// * `x` - Click column (absolute)
/// * `y` - Click row (absolute)
///
/// # Returns
///
/// The pressed MIDI note, or None when the click is outside the keys
pub fn hit_test(area: Rect, x: u16, y: u16) -> Option<u8> {
    if x < area.x || x >= area.x + area.width || y < area.y || y >= area.y + area.height {
        return None;
    }
    let slot_cols = area.width as f32 / WHITE_KEY_COUNT as f32;
    if slot_cols <= 0.0 {
        return None;
    }
    let x_units = (x - area.x) as f32 / slot_cols;

    let in_black_layer = y < area.y + BLACK_LAYER_ROWS;
    if in_black_layer {
        if let Some(note) = black_key_at(x_units) {
            return Some(note);
        }
    }
    white_key_at(x_units)
}

/// Renders the keyboard.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `area` - The area to render in
/// * `pressed` - Merged held-key set (touch + USB + BLE)
/// * `focused` - Whether this panel is focused
///
/// # Returns
///
/// The inner area used for key hit-testing
pub fn render_keyboard(
    frame: &mut Frame,
    area: Rect,
    pressed: &HashSet<u8>,
    focused: bool,
) -> Rect {
    let block = Block::default()
        .title(" Keyboard (A0-C8) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::Gray }));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.width == 0 || inner.height == 0 {
        return inner;
    }

    let slot_cols = inner.width as f32 / WHITE_KEY_COUNT as f32;
    let buf = frame.buffer_mut();

    // White layer: full height, with a separator column at slot boundaries
    // so individual keys are distinguishable.
    for row in 0..inner.height {
        for col in 0..inner.width {
            let x_units = col as f32 / slot_cols;
            let Some(note) = white_key_at(x_units) else {
                continue;
            };
            let is_pressed = pressed.contains(&note);
            let at_boundary = {
                let slot = x_units as usize;
                let slot_start = (slot as f32 * slot_cols).round() as u16;
                col == slot_start && slot > 0
            };
            let style = if is_pressed {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            } else {
                Style::default().fg(Color::Black).bg(Color::White)
            };
            let symbol = if at_boundary { "│" } else { " " };
            if let Some(cell) = buf.cell_mut((inner.x + col, inner.y + row)) {
                cell.set_symbol(symbol).set_style(style);
            }
        }
    }

    // Black layer on top.
    for note in PIANO_LOW..=PIANO_HIGH {
        if !is_black_key(note) {
            continue;
        }
        let Some(x_units) = key_x_position(note) else {
            continue;
        };
        let col_start = (x_units * slot_cols).round() as u16;
        let col_end = (((x_units + BLACK_KEY_WIDTH_RATIO) * slot_cols).round() as u16)
            .min(inner.width)
            .max(col_start + 1);
        let is_pressed = pressed.contains(&note);
        let style = if is_pressed {
            Style::default()
                .fg(Color::White)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White).bg(Color::Black)
        };
        for row in 0..BLACK_LAYER_ROWS.min(inner.height) {
            for col in col_start..col_end.min(inner.width) {
                if let Some(cell) = buf.cell_mut((inner.x + col, inner.y + row)) {
                    cell.set_symbol(" ").set_style(style);
                }
            }
        }
    }

    // Octave markers on the bottom row: label each C.
    if inner.height >= 2 {
        let label_row = inner.y + inner.height - 1;
        for octave in 1..=8u8 {
            let note = 12 * (octave + 1); // C1..C8
            let Some(x_units) = key_x_position(note) else {
                continue;
            };
            let col = (x_units * slot_cols).round() as u16;
            if col < inner.width {
                if let Some(cell) = buf.cell_mut((inner.x + col, label_row)) {
                    cell.set_symbol("C")
                        .set_style(Style::default().fg(Color::DarkGray).bg(Color::White));
                }
            }
        }
    }

    inner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::keys;

    fn area() -> Rect {
        // One column per white key keeps the unit math exact.
        Rect::new(0, 0, 52, 6)
    }

    #[test]
    fn test_hit_test_white_keys() {
        assert_eq!(hit_test(area(), 0, 5), Some(21)); // A0, below black layer
        assert_eq!(hit_test(area(), 51, 5), Some(108)); // C8
    }

    #[test]
    fn test_hit_test_black_layer_first() {
        // Column 0 covers units [0, 1): A#0's span starts at 0.65, so a
        // click at unit 0.0 is white even in the black layer.
        assert_eq!(hit_test(area(), 0, 0), Some(21));

        // A column inside C#4's span resolves to the black key in the upper
        // rows and to a white key below them. With one column per unit, the
        // anchor slot's column always falls inside the span.
        let cs4 = keys::key_x_position(61).unwrap();
        let col = cs4.ceil() as u16;
        assert_eq!(hit_test(area(), col, 0), Some(61));
        let white = hit_test(area(), col, 4).unwrap();
        assert!(!is_black_key(white));
    }

    #[test]
    fn test_hit_test_outside() {
        assert_eq!(hit_test(area(), 60, 0), None);
        assert_eq!(hit_test(area(), 0, 10), None);
    }

    #[test]
    fn test_hit_test_uses_shared_geometry() {
        // Every black key's hit-test span comes from the same offset table
        // the falling-notes layout uses.
        for note in PIANO_LOW..=PIANO_HIGH {
            if !is_black_key(note) {
                continue;
            }
            let x = keys::key_x_position(note).unwrap();
            assert_eq!(keys::black_key_at(x + 0.1), Some(note));
        }
    }
}

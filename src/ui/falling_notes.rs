//! Falling-notes timeline view.
//!
//! Projects notes into a scrolling coordinate space synchronized to the
//! session clock. The layout is a pure function of
//! `(notes, active notes, clock, mode)` — no mutable timing state lives
//! here — and is recomputed on every frame tick.
//!
//! Three layouts share one geometry:
//! - Recording: completed notes rise up and away from the hit line at the
//!   bottom, newest nearest the line; held keys grow upward from the line.
//! - Playback: notes fall from above, reaching the hit line exactly when the
//!   clock equals their onset.
//! - Static: the whole sequence stands motionless, stacked by timestamp
//!   (identical to playback at clock zero).
//!
//! Horizontal placement comes from [`crate::midi::keys`], the same lookup
//! the interactive keyboard uses, so columns and keys cannot drift apart.

use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;

use crate::midi::keys::{key_width, key_x_position};
use crate::midi::{is_black_key, Note, WHITE_KEY_COUNT};
use crate::session::recorder::ActiveNote;

/// Vertical scale: how many layout pixels one second of music occupies.
pub const PIXELS_PER_SECOND: f32 = 8.0;

/// Minimum rendered height, so very short notes stay visible.
pub const MIN_NOTE_HEIGHT: f32 = 1.0;

/// Which layout the timeline is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineMode {
    Recording,
    Playback,
    Static,
}

/// The drawable region, in layout pixels. The hit line is the bottom edge.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub pixels_per_second: f32,
    pub min_note_height: f32,
}

impl Viewport {
    /// Creates a viewport with the default scale constants.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            pixels_per_second: PIXELS_PER_SECOND,
            min_note_height: MIN_NOTE_HEIGHT,
        }
    }

    /// Width of one white-key slot in layout pixels.
    fn slot_width(&self) -> f32 {
        self.width / WHITE_KEY_COUNT as f32
    }

    /// Converts a duration to a vertical distance.
    fn ms_to_px(&self, ms: u64) -> f32 {
        ms as f32 / 1000.0 * self.pixels_per_second
    }
}

/// A positioned note rectangle, in layout pixels.
///
/// `top` is measured from the top of the viewport; the hit line sits at
/// `viewport.height`. Rectangles may extend past either edge; the rasterizer
/// clips them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteRect {
    pub midi_number: u8,
    pub x: f32,
    pub width: f32,
    pub top: f32,
    pub height: f32,
    /// True when the note is audible at the clock reading used for layout.
    pub sounding: bool,
}

/// Computes the positioned rectangles for one frame.
///
/// # Arguments
///
/// * `notes` - Completed notes (the take so far, or the sequence replayed)
/// * `active` - Held keys with their onsets (empty outside recording)
/// * `now_ms` - Clock reading: recording-elapsed or playback time
/// * `mode` - Which layout to apply
/// * `viewport` - Target region and scale
///
/// # Returns
///
/// Rectangles for every note at least partially inside the viewport
pub fn layout_notes(
    notes: &[Note],
    active: &[(u8, ActiveNote)],
    now_ms: u64,
    mode: TimelineMode,
    viewport: Viewport,
) -> Vec<NoteRect> {
    let mut rects = Vec::new();
    let slot = viewport.slot_width();

    for note in notes {
        let Some(x_units) = key_x_position(note.midi_number) else {
            continue;
        };
        let height = viewport
            .ms_to_px(note.duration_ms)
            .max(viewport.min_note_height);

        // Vertical distance from the hit line to the rectangle's bottom edge.
        // Positive = above the line.
        let bottom_above_line = match mode {
            // Completed notes drift upward as time passes: a note's bottom
            // sits at its distance-into-the-past, measured from its release.
            TimelineMode::Recording => viewport.ms_to_px(now_ms.saturating_sub(note.end_offset_ms())),
            // Notes fall: the bottom touches the line when now == onset,
            // then continues below it while the note sounds.
            TimelineMode::Playback => {
                let onset_px = viewport.ms_to_px(note.onset_offset_ms);
                let now_px = viewport.ms_to_px(now_ms);
                onset_px - now_px
            }
            // Motionless stack, anchored at clock zero.
            TimelineMode::Static => viewport.ms_to_px(note.onset_offset_ms),
        };

        let top = viewport.height - bottom_above_line - height;
        if top >= viewport.height || top + height <= 0.0 {
            continue;
        }

        rects.push(NoteRect {
            midi_number: note.midi_number,
            x: x_units * slot,
            width: key_width(note.midi_number) * slot,
            top,
            height,
            sounding: mode == TimelineMode::Playback && note.is_sounding_at(now_ms),
        });
    }

    // Held keys render as bars growing up from the hit line.
    if mode == TimelineMode::Recording {
        for (midi_number, active_note) in active {
            let Some(x_units) = key_x_position(*midi_number) else {
                continue;
            };
            let height = viewport
                .ms_to_px(now_ms.saturating_sub(active_note.onset_ms))
                .max(viewport.min_note_height);
            rects.push(NoteRect {
                midi_number: *midi_number,
                x: x_units * slot,
                width: key_width(*midi_number) * slot,
                top: viewport.height - height,
                height,
                sounding: true,
            });
        }
    }

    rects
}

/// Renders the falling-notes panel.
///
/// One layout pixel maps to one terminal cell; the hit line is the bottom
/// row of the panel's inner area.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `area` - The area to render in
/// * `notes` - Completed notes for the current view
/// * `active` - Held keys (recording only)
/// * `now_ms` - Clock reading for this frame
/// * `mode` - Timeline mode
pub fn render_falling_notes(
    frame: &mut Frame,
    area: Rect,
    notes: &[Note],
    active: &[(u8, ActiveNote)],
    now_ms: u64,
    mode: TimelineMode,
) {
    let title = match mode {
        TimelineMode::Recording => " Timeline [recording] ",
        TimelineMode::Playback => " Timeline [playback] ",
        TimelineMode::Static => " Timeline ",
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let viewport = Viewport::new(inner.width as f32, inner.height as f32);
    let rects = layout_notes(notes, active, now_ms, mode, viewport);

    let buf = frame.buffer_mut();
    for rect in rects {
        let col_start = rect.x.floor().max(0.0) as u16;
        let col_end = ((rect.x + rect.width).ceil() as u16).min(inner.width).max(col_start + 1);
        let row_start = rect.top.floor().max(0.0) as u16;
        let row_end = ((rect.top + rect.height).ceil() as u16).min(inner.height);
        if row_start >= inner.height {
            continue;
        }

        let color = if rect.sounding {
            Color::Cyan
        } else if is_black_key(rect.midi_number) {
            Color::Blue
        } else {
            Color::LightBlue
        };

        for row in row_start..row_end {
            for col in col_start..col_end.min(inner.width) {
                let cell_x = inner.x + col;
                let cell_y = inner.y + row;
                if let Some(cell) = buf.cell_mut((cell_x, cell_y)) {
                    cell.set_symbol("█").set_style(Style::default().fg(color));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::keys;
    use crate::midi::{PIANO_HIGH, PIANO_LOW};

    fn note(midi: u8, onset: u64, duration: u64) -> Note {
        Note::from_absolute(midi, onset, onset + duration, 0, false)
    }

    fn viewport() -> Viewport {
        // 52 px wide (one pixel per white key), 100 px tall, 10 px/s scale
        Viewport {
            width: 52.0,
            height: 100.0,
            pixels_per_second: 10.0,
            min_note_height: 1.0,
        }
    }

    #[test]
    fn test_playback_note_reaches_hit_line_at_onset() {
        let notes = [note(60, 2000, 500)];
        // At now == onset the bottom edge must sit exactly on the hit line.
        let rects = layout_notes(&notes, &[], 2000, TimelineMode::Playback, viewport());
        assert_eq!(rects.len(), 1);
        let rect = rects[0];
        assert!((rect.top + rect.height - 100.0).abs() < 1e-3);
        assert!(rect.sounding);
    }

    #[test]
    fn test_playback_note_above_line_before_onset() {
        let notes = [note(60, 2000, 500)];
        // One second early: bottom edge 10 px above the line.
        let rects = layout_notes(&notes, &[], 1000, TimelineMode::Playback, viewport());
        let rect = rects[0];
        assert!((rect.top + rect.height - 90.0).abs() < 1e-3);
        assert!(!rect.sounding);
    }

    #[test]
    fn test_recording_note_rises_after_release() {
        let notes = [note(60, 0, 1000)]; // released at 1000 ms
        // Two seconds after release the bottom edge is 20 px above the line.
        let rects = layout_notes(&notes, &[], 3000, TimelineMode::Recording, viewport());
        let rect = rects[0];
        assert!((rect.top + rect.height - 80.0).abs() < 1e-3);
        // 1000 ms duration at 10 px/s
        assert!((rect.height - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_static_is_playback_at_zero() {
        let notes = [note(60, 1000, 500), note(64, 3000, 250)];
        let static_rects = layout_notes(&notes, &[], 0, TimelineMode::Static, viewport());
        let playback_rects = layout_notes(&notes, &[], 0, TimelineMode::Playback, viewport());
        for (s, p) in static_rects.iter().zip(&playback_rects) {
            assert!((s.top - p.top).abs() < 1e-3);
            assert!((s.height - p.height).abs() < 1e-3);
        }
    }

    #[test]
    fn test_min_height_floor() {
        let notes = [note(60, 0, 10)]; // 10 ms would be 0.1 px
        let rects = layout_notes(&notes, &[], 0, TimelineMode::Static, viewport());
        assert!((rects[0].height - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_active_note_grows_from_hit_line() {
        let active = [(
            60u8,
            ActiveNote {
                onset_ms: 1000,
                velocity: 100,
            },
        )];
        let rects = layout_notes(&[], &active, 3000, TimelineMode::Recording, viewport());
        assert_eq!(rects.len(), 1);
        let rect = rects[0];
        // Grows with hold time and stays glued to the line.
        assert!((rect.height - 20.0).abs() < 1e-3);
        assert!((rect.top + rect.height - 100.0).abs() < 1e-3);
        assert!(rect.sounding);
    }

    #[test]
    fn test_offscreen_notes_culled() {
        let notes = [note(60, 60_000, 500)]; // far in the future
        let rects = layout_notes(&notes, &[], 0, TimelineMode::Playback, viewport());
        assert!(rects.is_empty());
    }

    #[test]
    fn test_x_positions_match_keyboard_lookup() {
        // The renderer and the keyboard must use bit-for-bit the same
        // horizontal lookup for every black key on the piano.
        let vp = viewport();
        let slot = vp.width / WHITE_KEY_COUNT as f32;
        for midi in PIANO_LOW..=PIANO_HIGH {
            if !is_black_key(midi) {
                continue;
            }
            let notes = [note(midi, 0, 100)];
            let rects = layout_notes(&notes, &[], 0, TimelineMode::Static, vp);
            assert_eq!(rects.len(), 1, "black key {} not laid out", midi);
            let expected = keys::key_x_position(midi).unwrap() * slot;
            assert_eq!(rects[0].x, expected, "black key {} drifted", midi);
        }
    }
}

//! 88-key piano geometry.
//!
//! Single source of truth for horizontal key positions. Both the falling-notes
//! view and the interactive keyboard derive their X coordinates from
//! `key_x_position`, so a note column always lines up with the key below it.
//!
//! White keys occupy consecutive unit-width slots (52 slots for A0-C8). A
//! black key sits between two white keys, shifted left from the following
//! white key's slot by a per-pitch fraction of the key width.

use super::{is_black_key, PIANO_LOW, WHITE_KEY_COUNT};

/// Fractional X offsets for the five black-key pitch classes, relative to the
/// slot of the white key that follows them. Indexed by pitch class
/// (C=0 .. B=11); white pitch classes hold 0.0.
///
/// C#: -0.4, D#: -0.3, F#: -0.4, G#: -0.35, A#: -0.35
pub const BLACK_KEY_OFFSETS: [f32; 12] = [
    0.0,   // C
    -0.4,  // C#
    0.0,   // D
    -0.3,  // D#
    0.0,   // E
    0.0,   // F
    -0.4,  // F#
    0.0,   // G
    -0.35, // G#
    0.0,   // A
    -0.35, // A#
    0.0,   // B
];

/// Width of a black key as a fraction of a white key's width.
pub const BLACK_KEY_WIDTH_RATIO: f32 = 0.6;

/// Index of a white key among the 52 white keys, counting from A0.
///
/// # Arguments
///
/// * `note` - MIDI note number of a white key within the piano range
///
/// # Returns
///
/// 0 for A0, 51 for C8; None for black keys or out-of-range notes
pub fn white_key_index(note: u8) -> Option<usize> {
    if !super::in_piano_range(note) || is_black_key(note) {
        return None;
    }
    let mut index = 0usize;
    for n in PIANO_LOW..note {
        if !is_black_key(n) {
            index += 1;
        }
    }
    Some(index)
}

/// Horizontal position of a key's left edge in white-key-width units.
///
/// White keys land exactly on their slot index. A black key lands on the slot
/// of the next white key up, shifted left by its `BLACK_KEY_OFFSETS` fraction.
/// Positions are in [0, 52); multiply by the rendered white-key width to get
/// pixels or terminal columns.
///
/// # Arguments
///
/// * `note` - MIDI note number within the piano range
///
/// # Returns
///
/// The left-edge position, or None if the note is outside the 88 keys
pub fn key_x_position(note: u8) -> Option<f32> {
    if !super::in_piano_range(note) {
        return None;
    }
    if !is_black_key(note) {
        return white_key_index(note).map(|i| i as f32);
    }
    // Black key: anchor on the following white key (always in range, since
    // the highest black key is A#7 = 106 and C8 = 108 exists).
    let next_white = note + 1;
    let slot = white_key_index(next_white)? as f32;
    let offset = BLACK_KEY_OFFSETS[(note % 12) as usize];
    Some(slot + offset)
}

/// Width of a key in white-key-width units.
pub fn key_width(note: u8) -> f32 {
    if is_black_key(note) {
        BLACK_KEY_WIDTH_RATIO
    } else {
        1.0
    }
}

/// The white key whose slot contains the given position, ignoring black keys.
///
/// Used for hit-testing the lower (white) layer of the keyboard after the
/// black layer has had first refusal.
///
/// # Arguments
///
/// * `x` - Position in white-key-width units
///
/// # Returns
///
/// The MIDI note of the white key at that slot, or None if out of range
pub fn white_key_at(x: f32) -> Option<u8> {
    if x < 0.0 {
        return None;
    }
    let slot = x as usize;
    if slot >= WHITE_KEY_COUNT {
        return None;
    }
    let mut index = 0usize;
    for note in PIANO_LOW..=super::PIANO_HIGH {
        if !is_black_key(note) {
            if index == slot {
                return Some(note);
            }
            index += 1;
        }
    }
    None
}

/// The black key covering the given position, if any.
///
/// # Arguments
///
/// * `x` - Position in white-key-width units
///
/// # Returns
///
/// The MIDI note of the black key whose span contains `x`, or None
pub fn black_key_at(x: f32) -> Option<u8> {
    for note in PIANO_LOW..=super::PIANO_HIGH {
        if !is_black_key(note) {
            continue;
        }
        if let Some(left) = key_x_position(note) {
            if x >= left && x < left + BLACK_KEY_WIDTH_RATIO {
                return Some(note);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{PIANO_HIGH, PIANO_LOW};

    #[test]
    fn test_white_key_indices() {
        assert_eq!(white_key_index(21), Some(0)); // A0
        assert_eq!(white_key_index(23), Some(1)); // B0
        assert_eq!(white_key_index(24), Some(2)); // C1
        assert_eq!(white_key_index(108), Some(51)); // C8
        assert_eq!(white_key_index(22), None); // A#0 is black
        assert_eq!(white_key_index(20), None); // below range
    }

    #[test]
    fn test_black_key_positions() {
        // A#0 anchors on B0 (slot 1), offset -0.35
        let x = key_x_position(22).unwrap();
        assert!((x - 0.65).abs() < 1e-6);

        // C#4 anchors on D4's slot with the C# table offset
        let cs4 = key_x_position(61).unwrap();
        let d4_slot = white_key_index(62).unwrap() as f32;
        assert!((cs4 - (d4_slot - 0.4)).abs() < 1e-6);
    }

    #[test]
    fn test_every_key_has_a_position() {
        for note in PIANO_LOW..=PIANO_HIGH {
            assert!(key_x_position(note).is_some(), "note {} missing", note);
        }
        assert!(key_x_position(PIANO_LOW - 1).is_none());
        assert!(key_x_position(PIANO_HIGH + 1).is_none());
    }

    #[test]
    fn test_positions_monotonic() {
        let mut last = -1.0f32;
        for note in PIANO_LOW..=PIANO_HIGH {
            let x = key_x_position(note).unwrap();
            assert!(x > last, "note {} not right of its predecessor", note);
            last = x;
        }
    }

    #[test]
    fn test_white_hit_testing() {
        assert_eq!(white_key_at(0.0), Some(21)); // A0
        assert_eq!(white_key_at(0.99), Some(21));
        assert_eq!(white_key_at(1.0), Some(23)); // B0
        assert_eq!(white_key_at(51.5), Some(108)); // C8
        assert_eq!(white_key_at(52.0), None);
        assert_eq!(white_key_at(-0.1), None);
    }

    #[test]
    fn test_black_hit_testing() {
        // A#0 spans [0.65, 1.25)
        assert_eq!(black_key_at(0.7), Some(22));
        assert_eq!(black_key_at(1.2), Some(22));
        assert_eq!(black_key_at(0.5), None);
        // C#4 span starts at its computed position
        let cs4 = key_x_position(61).unwrap();
        assert_eq!(black_key_at(cs4 + 0.1), Some(61));
    }
}

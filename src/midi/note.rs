//! Durable note records.
//!
//! A `Note` is the unit of a recording: one completed note-on/note-off pair
//! with timing relative to the recording clock. Notes are immutable once
//! constructed and live as long as the `Recording` that owns them.

use serde::{Deserialize, Serialize};

use super::note_to_name;

/// A single recorded note.
///
/// Created only when a matching note-off arrives for a previously observed
/// note-on during an active recording session. All timing is in milliseconds;
/// `onset_offset_ms` is relative to the start of the recording, while the
/// absolute fields preserve the session-clock readings they were derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Human-readable pitch name, e.g. "C#4".
    pub pitch_name: String,

    /// MIDI note number, within the 88-key piano range (21-108).
    pub midi_number: u8,

    /// Onset relative to the start of the recording, in milliseconds.
    pub onset_offset_ms: u64,

    /// How long the key was held, in milliseconds.
    pub duration_ms: u64,

    /// Session-clock reading at key press.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_onset_ms: Option<u64>,

    /// Session-clock reading at key release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_offset_ms: Option<u64>,

    /// Whether the sustain pedal was down when the key was released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustain_active_at_release: Option<bool>,
}

impl Note {
    /// Constructs a note from absolute session-clock timestamps.
    ///
    /// # Arguments
    ///
    /// * `midi_number` - MIDI note number
    /// * `absolute_onset_ms` - Session clock at key press
    /// * `absolute_offset_ms` - Session clock at key release
    /// * `recording_start_ms` - Session clock at recording start
    /// * `sustain_active` - Sustain pedal state at release
    ///
    /// # Returns
    ///
    /// A note with `duration_ms = offset - onset` and
    /// `onset_offset_ms = onset - recording_start`
    pub fn from_absolute(
        midi_number: u8,
        absolute_onset_ms: u64,
        absolute_offset_ms: u64,
        recording_start_ms: u64,
        sustain_active: bool,
    ) -> Self {
        Self {
            pitch_name: note_to_name(midi_number),
            midi_number,
            onset_offset_ms: absolute_onset_ms.saturating_sub(recording_start_ms),
            duration_ms: absolute_offset_ms.saturating_sub(absolute_onset_ms),
            absolute_onset_ms: Some(absolute_onset_ms),
            absolute_offset_ms: Some(absolute_offset_ms),
            sustain_active_at_release: Some(sustain_active),
        }
    }

    /// End of the note relative to the recording start.
    pub fn end_offset_ms(&self) -> u64 {
        self.onset_offset_ms.saturating_add(self.duration_ms)
    }

    /// Checks if this note is sounding at a playback-clock instant.
    ///
    /// The window is inclusive on both ends: a note with onset 500 and
    /// duration 200 is sounding for `now` in [500, 700].
    pub fn is_sounding_at(&self, now_ms: u64) -> bool {
        now_ms >= self.onset_offset_ms && now_ms <= self.end_offset_ms()
    }
}

/// A sustain-pedal transition during a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SustainEvent {
    /// When the pedal changed, relative to the start of the recording.
    pub onset_offset_ms: u64,

    /// True when the pedal went down, false when it was released.
    pub is_active: bool,
}

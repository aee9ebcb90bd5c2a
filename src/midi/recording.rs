//! Recording aggregate.
//!
//! A recording is the durable output of a session: an ordered list of notes
//! plus the sustain-pedal transitions captured alongside them. Immutable
//! after save except for rename.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Note, SustainEvent};

/// A saved take: the notes and pedal events of one recording session.
///
/// Invariant: `notes` insertion order equals onset order. Notes are appended
/// as their note-offs arrive, so the session re-sorts by onset on flush to
/// hold the invariant for overlapping holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Unique identifier, generated at save time.
    pub id: String,

    /// Display name, user-editable via rename.
    pub name: String,

    /// Unix-epoch seconds when the recording was saved.
    pub created_at: u64,

    /// The recorded notes, ordered by onset.
    pub notes: Vec<Note>,

    /// Sustain-pedal transitions, ordered by offset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sustain_events: Vec<SustainEvent>,
}

impl Recording {
    /// Creates a recording with a fresh id and the current wall-clock time.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name
    /// * `notes` - Notes in onset order
    /// * `sustain_events` - Pedal transitions in time order
    pub fn new(name: impl Into<String>, notes: Vec<Note>, sustain_events: Vec<SustainEvent>) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at,
            notes,
            sustain_events,
        }
    }

    /// Total duration: the end of the last-sounding note, in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.notes
            .iter()
            .map(|n| n.end_offset_ms())
            .max()
            .unwrap_or(0)
    }

    /// Number of notes in the recording.
    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Returns true if there is nothing to play back.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Note;

    fn sample_notes() -> Vec<Note> {
        vec![
            Note::from_absolute(60, 100, 300, 100, false),
            Note::from_absolute(64, 500, 1200, 100, false),
        ]
    }

    #[test]
    fn test_duration_is_last_note_end() {
        let rec = Recording::new("take", sample_notes(), Vec::new());
        // Second note: onset 400, duration 700
        assert_eq!(rec.duration_ms(), 1100);
        assert_eq!(rec.note_count(), 2);
    }

    #[test]
    fn test_empty_recording() {
        let rec = Recording::new("empty", Vec::new(), Vec::new());
        assert!(rec.is_empty());
        assert_eq!(rec.duration_ms(), 0);
    }

    #[test]
    fn test_unique_ids() {
        let a = Recording::new("a", Vec::new(), Vec::new());
        let b = Recording::new("b", Vec::new(), Vec::new());
        assert_ne!(a.id, b.id);
    }
}

//! Canonical MIDI events.
//!
//! Every input source (USB, BLE, on-screen keyboard) normalizes its wire
//! format into these types before anything downstream sees it. Events are
//! ephemeral: they drive the audio engine and the recording session and are
//! never persisted as-is.

use serde::{Deserialize, Serialize};

/// MIDI controller number for the sustain (damper) pedal.
pub const SUSTAIN_CONTROLLER: u8 = 64;

/// Whether a note event starts or ends a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteKind {
    On,
    Off,
}

/// A normalized note event from any input source.
///
/// A Note-On with velocity 0 must be converted to `NoteKind::Off` at the
/// transport boundary (per the MIDI spec); consumers may assume `On` always
/// carries an audible velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// MIDI note number (0-127). 60 = Middle C (C4).
    pub note: u8,

    /// Note velocity (0-127). Always > 0 for `NoteKind::On`.
    pub velocity: u8,

    /// Whether this is a note-on or note-off.
    pub kind: NoteKind,

    /// Monotonic timestamp in milliseconds, from the shared session clock.
    pub timestamp_ms: u64,

    /// MIDI channel (0-15), when the transport reports one.
    pub channel: Option<u8>,
}

impl MidiEvent {
    /// Creates a note-on event.
    pub fn note_on(note: u8, velocity: u8, timestamp_ms: u64) -> Self {
        Self {
            note: note.min(127),
            velocity: velocity.min(127),
            kind: NoteKind::On,
            timestamp_ms,
            channel: None,
        }
    }

    /// Creates a note-off event.
    pub fn note_off(note: u8, timestamp_ms: u64) -> Self {
        Self {
            note: note.min(127),
            velocity: 0,
            kind: NoteKind::Off,
            timestamp_ms,
            channel: None,
        }
    }
}

/// A normalized control-change event.
///
/// Only controller 64 (sustain pedal) is interpreted downstream; other
/// controllers pass through the event path and are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChangeEvent {
    /// MIDI controller number.
    pub controller: u8,

    /// Controller value (0-127).
    pub value: u8,

    /// Monotonic timestamp in milliseconds, from the shared session clock.
    pub timestamp_ms: u64,
}

impl ControlChangeEvent {
    /// Returns true if this is a sustain-pedal event with the pedal down.
    /// Per the MIDI spec, value >= 64 means pedal down.
    pub fn is_sustain_down(&self) -> bool {
        self.controller == SUSTAIN_CONTROLLER && self.value >= 64
    }

    /// Returns true if this event is for the sustain pedal at all.
    pub fn is_sustain(&self) -> bool {
        self.controller == SUSTAIN_CONTROLLER
    }
}

/// A decoded message from any input source: the payload of the shared event
/// channel that all producers feed and the app's main loop drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    Note(MidiEvent),
    Control(ControlChangeEvent),
}

impl MidiMessage {
    /// The note event inside, if this is one.
    #[allow(dead_code)]
    pub fn note(&self) -> Option<MidiEvent> {
        match self {
            MidiMessage::Note(event) => Some(*event),
            MidiMessage::Control(_) => None,
        }
    }

    /// The control-change event inside, if this is one.
    #[allow(dead_code)]
    pub fn control(&self) -> Option<ControlChangeEvent> {
        match self {
            MidiMessage::Note(_) => None,
            MidiMessage::Control(event) => Some(*event),
        }
    }
}

/// Decodes a single raw MIDI channel message into a canonical event.
///
/// Handles the three message families the engine cares about: note-on
/// (0x90), note-off (0x80), and control-change (0xB0). A note-on with
/// velocity 0 is converted to a note-off here, so downstream code never
/// sees the encoding. Everything else (program change, pitch bend, SysEx)
/// returns None.
///
/// # Arguments
///
/// * `msg` - Raw MIDI bytes, status byte first
/// * `timestamp_ms` - Timestamp to stamp the decoded event with
///
/// # Returns
///
/// The decoded message, or None if the bytes are not recognized
pub fn decode_midi_message(msg: &[u8], timestamp_ms: u64) -> Option<MidiMessage> {
    if msg.len() < 3 {
        return None;
    }
    let status = msg[0];
    let channel = status & 0x0F;

    match status & 0xF0 {
        0x90 => {
            let (note, velocity) = (msg[1] & 0x7F, msg[2] & 0x7F);
            let mut event = if velocity == 0 {
                // Note-on with velocity 0 is a note-off per the MIDI spec
                MidiEvent::note_off(note, timestamp_ms)
            } else {
                MidiEvent::note_on(note, velocity, timestamp_ms)
            };
            event.channel = Some(channel);
            Some(MidiMessage::Note(event))
        }
        0x80 => {
            let mut event = MidiEvent::note_off(msg[1] & 0x7F, timestamp_ms);
            event.channel = Some(channel);
            Some(MidiMessage::Note(event))
        }
        0xB0 => Some(MidiMessage::Control(ControlChangeEvent {
            controller: msg[1] & 0x7F,
            value: msg[2] & 0x7F,
            timestamp_ms,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_note_on() {
        let event = decode_midi_message(&[0x90, 60, 100], 5)
            .and_then(|m| m.note())
            .unwrap();
        assert_eq!(event.note, 60);
        assert_eq!(event.velocity, 100);
        assert_eq!(event.kind, NoteKind::On);
        assert_eq!(event.timestamp_ms, 5);
        assert_eq!(event.channel, Some(0));
    }

    #[test]
    fn test_decode_note_off() {
        let event = decode_midi_message(&[0x83, 60, 64], 0)
            .and_then(|m| m.note())
            .unwrap();
        assert_eq!(event.kind, NoteKind::Off);
        assert_eq!(event.channel, Some(3));
    }

    #[test]
    fn test_velocity_zero_is_note_off() {
        let event = decode_midi_message(&[0x90, 60, 0], 0)
            .and_then(|m| m.note())
            .unwrap();
        assert_eq!(event.kind, NoteKind::Off);
    }

    #[test]
    fn test_decode_control_change() {
        let cc = decode_midi_message(&[0xB0, 64, 127], 0)
            .and_then(|m| m.control())
            .unwrap();
        assert_eq!(cc.controller, SUSTAIN_CONTROLLER);
        assert!(cc.is_sustain_down());

        let cc = decode_midi_message(&[0xB0, 64, 63], 0)
            .and_then(|m| m.control())
            .unwrap();
        assert!(cc.is_sustain());
        assert!(!cc.is_sustain_down());
    }

    #[test]
    fn test_unrecognized_messages_ignored() {
        // Program change, pitch bend, truncated note-on
        assert!(decode_midi_message(&[0xC0, 5, 0], 0).is_none());
        assert!(decode_midi_message(&[0xE0, 0, 64], 0).is_none());
        assert!(decode_midi_message(&[0x90, 60], 0).is_none());
        assert!(decode_midi_message(&[], 0).is_none());
    }
}

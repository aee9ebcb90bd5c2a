//! Recording session.
//!
//! Consumes canonical note and control events (from all input sources,
//! already merged onto one channel) and assembles immutable `Note` records
//! against a single recording clock.
//!
//! Two tiers of state, with different update rules:
//! - The active-note map updates synchronously on every event; it drives the
//!   live "growing bar" rendering and must never lag.
//! - Completed notes are buffered in a pending batch and flushed on an
//!   interval or at stop, so a flurry of events never forces a re-render
//!   per note.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::midi::{ControlChangeEvent, MidiEvent, Note, NoteKind, SustainEvent};

/// How often the pending batch is flushed while recording, in ms.
const FLUSH_INTERVAL_MS: u64 = 250;

/// A key currently held down during recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveNote {
    /// Session-clock reading at key press.
    pub onset_ms: u64,

    /// Velocity of the press.
    pub velocity: u8,
}

/// State machine: Idle -> Recording -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Recording,
}

/// Assembles note events into a recording.
pub struct RecordingSession {
    state: SessionState,
    start_ms: u64,
    active: HashMap<u8, ActiveNote>,
    notes: Vec<Note>,
    pending: Vec<Note>,
    sustain_events: Vec<SustainEvent>,
    sustain_down: bool,
    last_flush_ms: u64,
}

impl RecordingSession {
    /// Creates an idle session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            start_ms: 0,
            active: HashMap::new(),
            notes: Vec::new(),
            pending: Vec::new(),
            sustain_events: Vec::new(),
            sustain_down: false,
            last_flush_ms: 0,
        }
    }

    /// True while a recording is in progress.
    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    /// Starts a recording, clearing every buffer from any previous take.
    ///
    /// # Arguments
    ///
    /// * `now_ms` - Session-clock reading that becomes the recording epoch
    pub fn start_recording(&mut self, now_ms: u64) {
        self.notes.clear();
        self.pending.clear();
        self.sustain_events.clear();
        self.active.clear();
        self.sustain_down = false;
        self.start_ms = now_ms;
        self.last_flush_ms = now_ms;
        self.state = SessionState::Recording;
        info!("recording started");
    }

    /// Stops the recording and returns the completed take.
    ///
    /// Flushes the pending batch first. Keys still held (note-ons without a
    /// matching note-off) are dropped: no partial notes are persisted.
    ///
    /// # Arguments
    ///
    /// * `now_ms` - Session-clock reading at stop
    ///
    /// # Returns
    ///
    /// The notes (onset order) and sustain events of the take
    pub fn stop_recording(&mut self, now_ms: u64) -> (Vec<Note>, Vec<SustainEvent>) {
        self.flush_pending();
        let orphans = self.active.len();
        if orphans > 0 {
            debug!(orphans, "dropping held keys without a release");
        }
        self.active.clear();
        self.state = SessionState::Idle;
        info!(
            notes = self.notes.len(),
            duration_ms = now_ms.saturating_sub(self.start_ms),
            "recording stopped"
        );
        (self.notes.clone(), self.sustain_events.clone())
    }

    /// Discards all buffers and note state without persisting anything.
    pub fn clear_recording(&mut self) {
        self.notes.clear();
        self.pending.clear();
        self.sustain_events.clear();
        self.active.clear();
        self.sustain_down = false;
        self.state = SessionState::Idle;
    }

    /// Applies a note event.
    ///
    /// Outside a recording this is a no-op for note assembly (the caller
    /// still uses the event for audio and key display). While recording:
    /// a note-on stamps the active map (a repeat without an intervening
    /// note-off overwrites the stale onset, matching keyboard retrigger
    /// behavior); a note-off pops the matching onset and appends a completed
    /// note to the pending batch. A note-off with no matching onset is
    /// silently discarded.
    pub fn handle_note(&mut self, event: MidiEvent) {
        if self.state != SessionState::Recording {
            return;
        }
        // Notes outside the 88 piano keys are audible but never recorded.
        if !crate::midi::in_piano_range(event.note) {
            return;
        }
        match event.kind {
            NoteKind::On => {
                self.active.insert(
                    event.note,
                    ActiveNote {
                        onset_ms: event.timestamp_ms,
                        velocity: event.velocity,
                    },
                );
            }
            NoteKind::Off => {
                let Some(active) = self.active.remove(&event.note) else {
                    return;
                };
                let note = Note::from_absolute(
                    event.note,
                    active.onset_ms,
                    event.timestamp_ms,
                    self.start_ms,
                    self.sustain_down,
                );
                self.pending.push(note);
            }
        }
    }

    /// Applies a control-change event. Only the sustain pedal is recorded.
    pub fn handle_control(&mut self, event: ControlChangeEvent) {
        if !event.is_sustain() {
            return;
        }
        let down = event.is_sustain_down();
        if self.state == SessionState::Recording && down != self.sustain_down {
            self.sustain_events.push(SustainEvent {
                onset_offset_ms: event.timestamp_ms.saturating_sub(self.start_ms),
                is_active: down,
            });
        }
        self.sustain_down = down;
    }

    /// Periodic maintenance: flushes the pending batch on its interval.
    ///
    /// # Arguments
    ///
    /// * `now_ms` - Current session-clock reading
    pub fn tick(&mut self, now_ms: u64) {
        if self.state != SessionState::Recording {
            return;
        }
        if now_ms.saturating_sub(self.last_flush_ms) >= FLUSH_INTERVAL_MS {
            self.flush_pending();
            self.last_flush_ms = now_ms;
        }
    }

    /// Moves pending notes into the completed list, restoring onset order.
    ///
    /// Notes complete in release order, which differs from onset order when
    /// holds overlap, so the whole list is re-sorted by onset on every flush.
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.notes.append(&mut self.pending);
        self.notes.sort_by_key(|n| n.onset_offset_ms);
    }

    /// Completed (flushed) notes of the take so far, in onset order.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Sustain transitions captured so far.
    #[allow(dead_code)]
    pub fn sustain_events(&self) -> &[SustainEvent] {
        &self.sustain_events
    }

    /// Keys currently held down, with their onsets. Always current.
    pub fn active_notes(&self) -> &HashMap<u8, ActiveNote> {
        &self.active
    }

    /// Current sustain-pedal state.
    pub fn sustain_down(&self) -> bool {
        self.sustain_down
    }

    /// Session-clock reading when the recording started.
    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// Elapsed recording time.
    ///
    /// # Arguments
    ///
    /// * `now_ms` - Current session-clock reading
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        if self.state == SessionState::Recording {
            now_ms.saturating_sub(self.start_ms)
        } else {
            0
        }
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(note: u8, at: u64) -> MidiEvent {
        MidiEvent::note_on(note, 100, at)
    }

    fn off(note: u8, at: u64) -> MidiEvent {
        MidiEvent::note_off(note, at)
    }

    fn sustain(value: u8, at: u64) -> ControlChangeEvent {
        ControlChangeEvent {
            controller: 64,
            value,
            timestamp_ms: at,
        }
    }

    #[test]
    fn test_basic_note_assembly() {
        let mut session = RecordingSession::new();
        session.start_recording(1000);
        session.handle_note(on(60, 1500));
        session.handle_note(off(60, 1900));

        let (notes, _) = session.stop_recording(2000);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].midi_number, 60);
        assert_eq!(notes[0].onset_offset_ms, 500);
        assert_eq!(notes[0].duration_ms, 400);
    }

    #[test]
    fn test_duration_equals_absolute_difference() {
        let mut session = RecordingSession::new();
        session.start_recording(250);
        session.handle_note(on(72, 300));
        session.handle_note(off(72, 1234));
        let (notes, _) = session.stop_recording(2000);
        assert_eq!(notes[0].duration_ms, 1234 - 300);
        assert_eq!(notes[0].onset_offset_ms, 300 - 250);
    }

    #[test]
    fn test_orphan_note_off_ignored() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10));
        session.handle_note(off(61, 20)); // never pressed
        session.handle_note(off(60, 30));
        let (notes, _) = session.stop_recording(100);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn test_orphan_note_on_dropped_at_stop() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10));
        session.handle_note(on(64, 20)); // held through stop
        session.handle_note(off(60, 30));
        let (notes, _) = session.stop_recording(100);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].midi_number, 60);
    }

    #[test]
    fn test_retrigger_overwrites_stale_onset() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10));
        session.handle_note(on(60, 50)); // retrigger, no note-off between
        session.handle_note(off(60, 80));
        let (notes, _) = session.stop_recording(100);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].onset_offset_ms, 50);
        assert_eq!(notes[0].duration_ms, 30);
    }

    #[test]
    fn test_notes_outside_piano_range_not_recorded() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(5, 10)); // below A0
        session.handle_note(off(5, 20));
        session.handle_note(on(120, 30)); // above C8
        session.handle_note(off(120, 40));
        let (notes, _) = session.stop_recording(100);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_events_outside_recording_ignored() {
        let mut session = RecordingSession::new();
        session.handle_note(on(60, 10));
        session.handle_note(off(60, 20));
        assert!(session.notes().is_empty());
        assert!(session.active_notes().is_empty());
    }

    #[test]
    fn test_no_leakage_across_sessions() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10));
        session.handle_note(off(60, 20));
        session.handle_note(on(64, 30)); // still held at stop
        session.stop_recording(50);

        session.start_recording(100);
        assert!(session.notes().is_empty());
        assert!(session.active_notes().is_empty());
        let (notes, sustain) = session.stop_recording(200);
        assert!(notes.is_empty());
        assert!(sustain.is_empty());
    }

    #[test]
    fn test_active_map_is_synchronous() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10));
        // Not yet flushed into notes, but the active map already knows.
        assert_eq!(session.active_notes().get(&60).unwrap().onset_ms, 10);
        session.handle_note(off(60, 20));
        assert!(session.active_notes().is_empty());
        // The completed note sits in the pending batch until a flush.
        assert!(session.notes().is_empty());
        session.tick(FLUSH_INTERVAL_MS + 1);
        assert_eq!(session.notes().len(), 1);
    }

    #[test]
    fn test_overlapping_holds_keep_onset_order() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10)); // released last
        session.handle_note(on(64, 20)); // released first
        session.handle_note(off(64, 30));
        session.handle_note(off(60, 40));
        let (notes, _) = session.stop_recording(100);
        let onsets: Vec<u64> = notes.iter().map(|n| n.onset_offset_ms).collect();
        assert_eq!(onsets, vec![10, 20]);
    }

    #[test]
    fn test_sustain_capture() {
        let mut session = RecordingSession::new();
        session.start_recording(1000);
        session.handle_control(sustain(127, 1100)); // down
        session.handle_note(on(60, 1200));
        session.handle_note(off(60, 1300));
        session.handle_control(sustain(0, 1400)); // up
        session.handle_note(on(62, 1500));
        session.handle_note(off(62, 1600));

        let (notes, sustain_events) = session.stop_recording(2000);
        assert_eq!(sustain_events.len(), 2);
        assert_eq!(sustain_events[0].onset_offset_ms, 100);
        assert!(sustain_events[0].is_active);
        assert_eq!(sustain_events[1].onset_offset_ms, 400);
        assert!(!sustain_events[1].is_active);

        assert_eq!(notes[0].sustain_active_at_release, Some(true));
        assert_eq!(notes[1].sustain_active_at_release, Some(false));
    }

    #[test]
    fn test_repeated_pedal_values_not_duplicated() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_control(sustain(127, 10));
        session.handle_control(sustain(100, 20)); // still down, no transition
        session.handle_control(sustain(0, 30));
        let (_, sustain_events) = session.stop_recording(100);
        assert_eq!(sustain_events.len(), 2);
    }

    #[test]
    fn test_clear_recording_discards() {
        let mut session = RecordingSession::new();
        session.start_recording(0);
        session.handle_note(on(60, 10));
        session.handle_note(off(60, 20));
        session.clear_recording();
        assert!(!session.is_recording());
        assert!(session.notes().is_empty());
        assert!(session.active_notes().is_empty());
    }
}
